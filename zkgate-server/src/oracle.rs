//! Decision oracle backed by an external prover process.
//!
//! The prover is started once per request. It receives the feature vector as
//! a single JSON line on stdin and reports its decision either on stdout or in
//! a side file. Anything that goes wrong (spawn failure, timeout, garbage
//! output) surfaces as [`OracleOutcome::Unparseable`].

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use zkgate::oracle::{DecisionOracle, OracleOutcome, decode_oracle_output};

use crate::config::OracleConfig;

/// Side files older than the run start by more than this are ignored.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// Why a prover run produced no output.
#[derive(Debug, thiserror::Error)]
pub enum OracleRunError {
    /// The process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that was started.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting for the process failed.
    #[error("failed to collect prover output: {0}")]
    Wait(#[source] std::io::Error),
    /// The process ran longer than allowed and was killed.
    #[error("prover did not finish within {0:?}")]
    Timeout(Duration),
}

/// Runs a prover command for every decision.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    proof_file: Option<PathBuf>,
    timeout: Duration,
}

impl CommandOracle {
    /// Runs `program` with `args`, killing it after `timeout`.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            proof_file: None,
            timeout,
        }
    }

    /// Reads the proof from `path` when stdout carries none.
    #[must_use]
    pub fn with_proof_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.proof_file = Some(path.into());
        self
    }

    /// Builds an oracle from configuration. `None` if the command is empty.
    #[must_use]
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        let oracle = Self::new(
            program.clone(),
            args.to_vec(),
            Duration::from_secs(config.timeout_secs),
        );
        Some(match &config.proof_file {
            Some(path) => oracle.with_proof_file(path.clone()),
            None => oracle,
        })
    }

    async fn run(&self, features: &serde_json::Value) -> Result<Output, OracleRunError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OracleRunError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut line = features.to_string();
            line.push('\n');
            // The prover may exit without reading its input.
            if let Err(err) = stdin.write_all(line.as_bytes()).await {
                tracing::debug!(error = %err, "prover closed stdin early");
            }
        }

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OracleRunError::Timeout(self.timeout))?
            .map_err(OracleRunError::Wait)
    }

    async fn read_proof_file(&self, started: SystemTime) -> Option<OracleOutcome> {
        let path = self.proof_file.as_ref()?;
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|meta| meta.modified())
            .ok()?;
        if modified + MTIME_SLACK < started {
            tracing::warn!(path = %path.display(), "ignoring stale proof file");
            return None;
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(decode_oracle_output(&bytes)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read proof file");
                None
            }
        }
    }
}

#[async_trait]
impl DecisionOracle for CommandOracle {
    #[tracing::instrument(name = "zkgate.oracle.decide", skip_all, fields(program = %self.program))]
    async fn decide(&self, features: &serde_json::Value) -> OracleOutcome {
        let started = SystemTime::now();
        let stdout = match self.run(features).await {
            Ok(output) => {
                if !output.status.success() {
                    tracing::warn!(status = %output.status, "prover exited unsuccessfully");
                }
                output.stdout
            }
            Err(err) => {
                tracing::warn!(error = %err, "prover run failed");
                return OracleOutcome::Unparseable(Vec::new());
            }
        };

        let outcome = decode_oracle_output(&stdout);
        if matches!(outcome, OracleOutcome::Proof { .. }) {
            return outcome;
        }
        match self.read_proof_file(started).await {
            Some(proof @ OracleOutcome::Proof { .. }) => proof,
            _ => {
                tracing::warn!(bytes = stdout.len(), "prover output unrecognized");
                outcome
            }
        }
    }
}

//! Signature parsing and signer recovery.
//!
//! Accepts 65-byte `r || s || v` signatures and 64-byte ERC-2098 compact
//! signatures. High-`s` signatures are normalized before recovery, so a
//! malleated copy of a signature recovers to the same address.

use alloy_primitives::{Address, B256, Signature};

/// Parses an ECDSA signature, or returns `None` for any other length or an
/// invalid encoding.
#[must_use]
pub fn parse_signature(bytes: &[u8]) -> Option<Signature> {
    match bytes.len() {
        65 => Signature::from_raw(bytes).ok().map(Signature::normalized_s),
        64 => Some(Signature::from_erc2098(bytes).normalized_s()),
        _ => None,
    }
}

/// Recovers the address that signed `digest`.
#[must_use]
pub fn recover_signer(signature: &[u8], digest: &B256) -> Option<Address> {
    parse_signature(signature)?
        .recover_address_from_prehash(digest)
        .ok()
}

/// Returns `true` if `signature` over `digest` recovers to `expected`.
#[must_use]
pub fn is_signed_by(signature: &[u8], digest: &B256, expected: Address) -> bool {
    recover_signer(signature, digest).is_some_and(|signer| signer == expected)
}

/// Checks an attestor's EIP-191 `personal_sign` signature over a proof digest.
///
/// Attestors vouch for a proof off-chain by signing its 32-byte digest as a
/// message. Returns `false` if the signature is malformed or recovers to
/// anyone but `attestor`.
#[must_use]
pub fn verify_attestation(proof_hash: &B256, signature: &[u8], attestor: Address) -> bool {
    parse_signature(signature)
        .and_then(|s| s.recover_address_from_msg(proof_hash.as_slice()).ok())
        .is_some_and(|signer| signer == attestor)
}

//! Solidity types shared by the codec, the gate contract client, and the
//! on-chain payment lookup.
//!
//! The struct definitions fix the EIP-712 type strings. A deployed gate
//! re-derives the same typehashes, so field names, types, and order here must
//! match the contract exactly. The gate interface takes the same structs as
//! call arguments.

use alloy_sol_types::sol;

sol! {
    /// The four-field commitment.
    ///
    /// `Commitment(bytes32 proofHash,uint8 decision,uint256 timestamp,uint256 nonce)`
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    struct Commitment {
        bytes32 proofHash;
        uint8 decision;
        uint256 timestamp;
        uint256 nonce;
    }

    /// The thirteen-field commitment binding a value transfer.
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    struct ExtendedCommitment {
        bytes32 proofHash;
        bytes32 modelHash;
        bytes32 inputHash;
        uint8 decision;
        uint8 confidence;
        address token;
        address recipient;
        uint256 amount;
        uint256 chainId;
        address agent;
        address attestor;
        uint256 timestamp;
        uint256 nonce;
    }

    /// The deployed authorization gate.
    ///
    /// `BindingMismatch.field` indexes `recipient`, `amount`, `chainId`.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IAuthorizationGate {
        struct AuthorizationRecord {
            address recipient;
            uint256 amount;
            bytes32 proofHash;
            uint8 decision;
            uint256 nonce;
            uint256 timestamp;
        }

        error NonceReplay(uint256 nonce);
        error NotAuthorized(uint8 decision);
        error CommitmentExpired(uint256 timestamp, uint256 currentTime);
        error InvalidSignature();
        error BindingMismatch(uint8 field);
        error NotOwner(address caller);
        error InsufficientCustody(uint256 available, uint256 requested);

        function token() external view returns (address);
        function custodyBalance() external view returns (uint256);
        function getVerification(bytes32 proofHash) external view returns (AuthorizationRecord memory);
        function executeTransfer(address recipient, uint256 amount, Commitment calldata commitment, bytes calldata signature) external;
        function executeTransferExtended(address recipient, uint256 amount, ExtendedCommitment calldata commitment, bytes calldata signature) external;
        function store(Commitment calldata commitment, bytes calldata signature) external returns (bytes32);
        function storeExtended(ExtendedCommitment calldata commitment, bytes calldata signature) external returns (bytes32);
        function deposit(uint256 amount) external;
        function withdraw(uint256 amount) external;
    }

    /// Minimal ERC-20 surface for balance reads.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }

    /// ERC-20 events read from payment receipts.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IERC20Events {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

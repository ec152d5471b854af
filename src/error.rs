//! Wallet errors. One enum, five kinds.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, WalletError>;

/// Coarse error class, stable across variants. Bridges forward it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Usage,
    Validation,
    Resource,
    Network,
    Crypto,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Usage => "usage",
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Network => "network",
            ErrorKind::Crypto => "crypto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    // Usage
    #[error("wallet already initialized")]
    AlreadyInitialized,
    #[error("wallet not initialized")]
    WalletNotInitialized,
    #[error("wallet store already open")]
    AlreadyOpen,
    #[error("wallet store closed")]
    Closed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not connected to a chain backend")]
    NotConnected,

    // Validation
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("invalid extended key: {0}")]
    InvalidKeyEncoding(String),
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid fee rate: {0} sat/vB")]
    InvalidFeeRate(f32),
    #[error("invalid amount: {0} sat")]
    InvalidAmount(u64),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Resource
    #[error("insufficient funds: needed {needed} sat, available {available} sat")]
    InsufficientFunds { needed: u64, available: u64 },

    // Network
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("chain backend timed out")]
    Timeout,
    #[error("sync failed: {0}")]
    SyncFailed(String),
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    // Crypto
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        use WalletError::*;
        match self {
            AlreadyInitialized | WalletNotInitialized | AlreadyOpen | Closed | InvalidArgument(_)
            | NotConnected => ErrorKind::Usage,
            InvalidMnemonic(_) | InvalidKeyEncoding(_) | InvalidDerivationPath(_)
            | InvalidDescriptor(_) | InvalidAddress(_) | InvalidFeeRate(_) | InvalidAmount(_)
            | InvalidEndpoint(_) => ErrorKind::Validation,
            InsufficientFunds { .. } => ErrorKind::Resource,
            ConnectionFailed(_) | Timeout | SyncFailed(_) | BroadcastRejected(_) => ErrorKind::Network,
            SigningFailed(_) => ErrorKind::Crypto,
        }
    }

    /// Short machine-readable code, e.g. `insufficient_funds`.
    pub fn code(&self) -> &'static str {
        use WalletError::*;
        match self {
            AlreadyInitialized => "already_initialized",
            WalletNotInitialized => "wallet_not_initialized",
            AlreadyOpen => "already_open",
            Closed => "closed",
            InvalidArgument(_) => "invalid_argument",
            NotConnected => "not_connected",
            InvalidMnemonic(_) => "invalid_mnemonic",
            InvalidKeyEncoding(_) => "invalid_key_encoding",
            InvalidDerivationPath(_) => "invalid_derivation_path",
            InvalidDescriptor(_) => "invalid_descriptor",
            InvalidAddress(_) => "invalid_address",
            InvalidFeeRate(_) => "invalid_fee_rate",
            InvalidAmount(_) => "invalid_amount",
            InvalidEndpoint(_) => "invalid_endpoint",
            InsufficientFunds { .. } => "insufficient_funds",
            ConnectionFailed(_) => "connection_failed",
            Timeout => "timeout",
            SyncFailed(_) => "sync_failed",
            BroadcastRejected(_) => "broadcast_rejected",
            SigningFailed(_) => "signing_failed",
        }
    }
}

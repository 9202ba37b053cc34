use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Signature request rejected by user")]
    UserRejectedSignature,

    #[error("Contract not deployed at {address}")]
    ContractNotDeployed { address: String },

    #[error("Operation failed after {attempts} attempts: {last}")]
    OperationFailed {
        attempts: u32,
        #[source]
        last: Box<CoreError>,
    },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Receipt for {tx_hash} not available after {waited_secs}s")]
    ReceiptTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::UpstreamRateLimited(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Upstream asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::UpstreamRateLimited(_))
    }

    /// Errors the retry executor may try again. Everything else is fatal
    /// for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited(_) | Self::UpstreamUnavailable(_)
        )
    }

    /// The failure that ended the operation, looking through retry exhaustion.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::OperationFailed { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return CoreError::UpstreamRateLimited(err.to_string());
        }
        if err.is_connect() || err.is_timeout() || err.is_request() {
            return CoreError::UpstreamUnavailable(err.to_string());
        }
        if err.status().map_or(false, |s| s.is_server_error()) {
            return CoreError::UpstreamUnavailable(err.to_string());
        }
        if err.is_decode() {
            return CoreError::Decode(err.to_string());
        }
        CoreError::Internal(err.to_string())
    }
}

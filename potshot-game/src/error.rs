use potshot_core::{CoreError, WagerStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WagerError>;

#[derive(Error, Debug)]
pub enum WagerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("A wager is already in progress for this player")]
    WagerInProgress,

    #[error("An outstanding commitment ({status:?}) must be settled first")]
    CommitmentOutstanding { status: WagerStatus },

    #[error("No pending commitment")]
    NoPendingCommitment,

    #[error("Secret for the pending commitment is not available")]
    SecretUnavailable,

    #[error("Reveal at block {current_block} is outside window ({opens_after}, {closes_at}]")]
    ProtocolWindowViolation {
        current_block: u64,
        opens_after: u64,
        closes_at: u64,
        /// The window has passed and the wager is forfeited.
        expired: bool,
    },

    #[error("Discount {discount_id} could not be consumed: {reason}")]
    DiscountConsumptionFailed { discount_id: String, reason: String },

    #[error("No bonus credit available: {0}")]
    BonusCreditUnavailable(String),

    #[error("Commit {tx_hash} confirmed but could not be stored locally: {source}")]
    DurableWriteFailed {
        tx_hash: String,
        commitment_hash: String,
        #[source]
        source: CoreError,
    },

    #[error("Commit {tx_hash} was submitted but not confirmed: {source}")]
    CommitUnconfirmed {
        tx_hash: String,
        commitment_hash: String,
        #[source]
        source: CoreError,
    },

    #[error("Not eligible to wager, cooldown {cooldown_remaining}s remaining")]
    NotEligible { cooldown_remaining: u64 },

    #[error("Unknown wager context: {0}")]
    UnknownContext(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl WagerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// The user declined the signature prompt. Nothing changed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.core().map(|e| e.root()), Some(CoreError::UserRejectedSignature))
    }

    pub fn core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(e) => Some(e),
            Self::DurableWriteFailed { source, .. } | Self::CommitUnconfirmed { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Text suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            Self::Core(core) => match core.root() {
                CoreError::UpstreamRateLimited(_) => {
                    "The network is busy right now. Please try again in a moment.".to_string()
                }
                CoreError::UpstreamUnavailable(_) => {
                    "Could not reach the network. Check your connection and try again later."
                        .to_string()
                }
                CoreError::InsufficientFunds(_) => {
                    "Insufficient funds to cover the wager and gas.".to_string()
                }
                CoreError::UserRejectedSignature => "Transaction cancelled.".to_string(),
                CoreError::ContractNotDeployed { address } => format!(
                    "The game contract at {} is not deployed. Wagering is disabled.",
                    address
                ),
                CoreError::Reverted { tx_hash } => {
                    format!("The transaction {} was rejected by the contract.", tx_hash)
                }
                other => format!("Something went wrong: {}", other),
            },
            Self::WalletNotConnected => "Connect a wallet first.".to_string(),
            Self::WagerInProgress => {
                "A wager is already being submitted. Wait for it to finish.".to_string()
            }
            Self::CommitmentOutstanding { status } => match status {
                WagerStatus::Expired => {
                    "Your previous wager expired. Clear it before placing a new one.".to_string()
                }
                _ => "You already have a wager waiting to be revealed.".to_string(),
            },
            Self::NoPendingCommitment => "There is no wager to reveal.".to_string(),
            Self::SecretUnavailable => {
                "The secret for this wager is no longer available, so it cannot be revealed."
                    .to_string()
            }
            Self::ProtocolWindowViolation {
                expired: true,
                closes_at,
                ..
            } => format!(
                "The reveal window closed at block {}. This wager is forfeited; clear it to play again.",
                closes_at
            ),
            Self::ProtocolWindowViolation {
                opens_after,
                current_block,
                ..
            } => format!(
                "Too early to reveal (block {}). Reveal is possible after block {}.",
                current_block, opens_after
            ),
            Self::DiscountConsumptionFailed { .. } => {
                "Your discount could not be applied, so no wager was placed.".to_string()
            }
            Self::BonusCreditUnavailable(_) => {
                "No bonus credit is available, so no wager was placed.".to_string()
            }
            Self::DurableWriteFailed { tx_hash, .. } => format!(
                "Your wager was placed on-chain (tx {}) and the funds were spent, but it could \
                 not be saved locally. Manual recovery is needed to reveal it.",
                tx_hash
            ),
            Self::CommitUnconfirmed { tx_hash, .. } => format!(
                "Your wager was sent (tx {}) but its confirmation has not arrived. The funds may \
                 already be spent. It is saved locally; run 'potshot recover' once the \
                 transaction is mined.",
                tx_hash
            ),
            Self::NotEligible { cooldown_remaining } => format!(
                "You can wager again in {} seconds.",
                cooldown_remaining
            ),
            Self::UnknownContext(name) => format!("Unknown wager type '{}'.", name),
            Self::InvalidRequest(msg) => msg.clone(),
        }
    }
}

use tally_types::ChainId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no wallet provider detected")]
    NoProvider,

    #[error("request rejected by user")]
    UserRejected,

    #[error("No accounts found")]
    NoAccounts,

    #[error("Please switch to network {expected} (wallet is on {actual})")]
    WrongNetwork { expected: ChainId, actual: ChainId },

    #[error("wallet not connected")]
    NotConnected,

    #[error("wallet provider error (code {code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("wallet provider error: {0}")]
    Provider(String),
}

impl SessionError {
    /// EIP-1193 "user rejected the request".
    pub const USER_REJECTED_CODE: i64 = 4001;

    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        match code {
            Self::USER_REJECTED_CODE => Self::UserRejected,
            _ => Self::Rpc {
                code,
                message: message.into(),
            },
        }
    }
}

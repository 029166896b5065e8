use tally_types::TxHash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The wallet holder declined to sign.
    #[error("Transaction rejected by user")]
    UserRejected,

    /// The contract refused the call (require/revert), detected at submission.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    /// The gateway gave up waiting for a receipt.
    #[error("timed out awaiting finality for {0}")]
    FinalityTimeout(TxHash),

    #[error("ledger call failed (code {code}): {message}")]
    Call { code: i64, message: String },

    #[error("ledger RPC error: {0}")]
    Rpc(String),

    #[error("invalid ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Provider error code for "user rejected the request" (EIP-1193).
    pub const USER_REJECTED_CODE: i64 = 4001;

    /// Error code gateways use for contract reverts.
    pub const REVERT_CODE: i64 = 3;

    /// Map a provider/gateway error code to the matching variant.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Self::USER_REJECTED_CODE => Self::UserRejected,
            Self::REVERT_CODE => Self::Reverted(message),
            _ => Self::Call { code, message },
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::UserRejected)
    }
}

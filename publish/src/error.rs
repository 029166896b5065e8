use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// No API credential configured. Raised before any request is made.
    #[error("Pinata JWT not configured")]
    MissingCredential,

    #[error("IPFS upload failed: {0}")]
    Upload(String),

    #[error("Failed to fetch from IPFS: {0}")]
    Retrieve(String),

    #[error("invalid publication response: {0}")]
    InvalidResponse(String),
}

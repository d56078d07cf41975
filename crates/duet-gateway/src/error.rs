use thiserror::Error;

/// Why a message send or history fetch was refused.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Caller is not a participant. Also returned for unknown conversations.
    #[error("forbidden")]
    Forbidden,

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Why a realtime handshake was refused. Only logged; the client just sees
/// the socket close.
#[derive(Debug, Error)]
pub enum HandshakeRejection {
    #[error("no credential token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("missing or malformed conversationId")]
    MissingConversation,

    #[error("user is not a participant")]
    NotParticipant,

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

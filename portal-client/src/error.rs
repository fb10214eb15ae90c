use portal_server::ErrorKind;
use thiserror::Error;

/// Failure of a client call, either on the way to the server or reported by it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("rejected by server ({kind:?}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Server-side error kind, if the server answered at all
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether re-issuing the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout | ClientError::Closed => true,
            ClientError::Rejected { kind, .. } => {
                matches!(kind, ErrorKind::Dependency | ErrorKind::Storage)
            }
            ClientError::Protocol(_) => false,
        }
    }

    pub(crate) fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        ClientError::Rejected {
            kind,
            message: message.into(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

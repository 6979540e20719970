use thiserror::Error;

/// Error taxonomy for the server. Variants map 1:1 onto §7 of the design
/// spec — callers dispatch on the *kind*, not on the message text.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket I/O failure or unexpected EOF mid-packet. Terminates the session.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Unknown packet type, oversize payload, or payload missing when required.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invitation/game state machine precondition violated.
    #[error("bad state: {0}")]
    BadState(&'static str),

    /// Invalid invitation id, unknown username, etc.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Login while already logged in, or under a name already taken.
    #[error("duplicate: {0}")]
    Duplicate(&'static str),

    /// Client registry at capacity.
    #[error("registry full")]
    Full,

    /// Unparseable move text or illegal placement.
    #[error("invalid move: {0}")]
    InvalidMove(&'static str),
}

impl ServerError {
    /// True if this error terminates the session loop rather than just
    /// producing a NACK for the current request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

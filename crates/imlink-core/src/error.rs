use thiserror::Error;

/// Errors produced by the imlink protocol layer and the nodes built on it.
#[derive(Debug, Error)]
pub enum ImError {
    #[error("codec error: {0}")]
    Codec(String),

    /// Origin/destination mismatch on an inbound message.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unhandled message: {0}")]
    UnhandledMessage(String),

    #[error("handler already registered for {0}")]
    DuplicateHandler(String),

    /// A correlated exchange is still pending on this channel.
    #[error("exchange already in progress: {0}")]
    ExchangeInProgress(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connector is not connected to a transfer")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ciborium::de::Error<std::io::Error>> for ImError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        ImError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for ImError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        ImError::Codec(e.to_string())
    }
}

pub type ImResult<T> = Result<T, ImError>;

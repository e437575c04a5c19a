use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScamandriosError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("No healthy host available in pool")]
    PoolExhausted,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Pool initialization failed: {0}")]
    PoolInit(String),

    #[error("Server error: {0}")]
    Application(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl ScamandriosError {
    /// Returns true if the error came from the session itself rather than from
    /// the server or the caller. These are the failures that take a connection
    /// out of rotation.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ScamandriosError::Connection(_)
                | ScamandriosError::Protocol(_)
                | ScamandriosError::Io(_)
                | ScamandriosError::JsonSerialization(_)
        )
    }
}

impl From<std::net::AddrParseError> for ScamandriosError {
    fn from(err: std::net::AddrParseError) -> Self {
        ScamandriosError::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScamandriosError>;

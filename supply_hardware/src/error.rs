use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("supply not connected")]
    Disconnected,
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("supply was superseded by another instance")]
    Superseded,
    #[error("timed out waiting for the supply")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupplyError>;

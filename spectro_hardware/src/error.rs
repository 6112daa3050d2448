use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("transport timeout on {0}")]
    Timeout(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

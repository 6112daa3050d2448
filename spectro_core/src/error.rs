use thiserror::Error;

/// Failure classes of a device transaction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("transport timeout: {0}")]
    TransportTimeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("duplicate frame (crc {0:#06x})")]
    DuplicateFrame(u16),
    #[error("device rejected request (status {0:#04x})")]
    DeviceRejected(u8),
    #[error("failed to read/parse EEPROM: {0}")]
    CalibrationCorrupt(#[from] ParseError),
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),
    #[error("transaction gate busy during {0}")]
    GateBusy(&'static str),
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("invalid state: {0}")]
    State(String),
}

impl DeviceError {
    /// Whether the packet loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::TransportTimeout(_)
                | DeviceError::ProtocolViolation(_)
                | DeviceError::DuplicateFrame(_)
                | DeviceError::GateBusy(_)
        )
    }
}

/// EEPROM blob rejected before any descriptor field escapes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient EEPROM pages: got {found}, need {required}")]
    InsufficientPages { found: usize, required: usize },
    #[error("EEPROM page {page} is unprogrammed (every byte {fill:#04x})")]
    CorruptEeprom { page: usize, fill: u8 },
    #[error("malformed field `{field}` at page {page} offset {offset}")]
    MalformedField {
        page: usize,
        offset: usize,
        field: &'static str,
    },
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

use thiserror::Error;

/// Everything that can end or degrade a recording session.
///
/// `MalformedPayload` is recovered inside the recorder and never reaches the
/// caller; the remaining kinds abort the session with no automatic retry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid recording duration {0:?}: enter a positive number of seconds (e.g. 300) or minutes (e.g. 5m)")]
    InvalidDuration(String),

    #[error("no Bluetooth adapter found")]
    AdapterUnavailable,

    #[error("no matching heart-rate device found")]
    DeviceNotFound,

    #[error("failed to establish connection: {0}")]
    ConnectionFailed(String),

    #[error("notification payload too short: need at least {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    #[error("not enough samples: need at least {needed}, got {actual}")]
    InsufficientData { needed: usize, actual: usize },

    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

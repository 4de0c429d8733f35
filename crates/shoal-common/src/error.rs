use thiserror::Error;

/// Validation errors for names supplied to engine entry points.
///
/// Record handling never raises these; malformed inbound names are
/// absorbed where they are seen. Only constructors reject bad input.
#[derive(Debug, Error)]
pub enum NameError {
    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("Invalid instance name: {0}")]
    InvalidInstanceName(String),

    #[error("Invalid host name: {0}")]
    InvalidHostName(String),
}

pub type Result<T> = std::result::Result<T, NameError>;

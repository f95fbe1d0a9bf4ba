use thiserror::Error;

#[derive(Error, Debug)]
pub enum J2cError {
    /// Header missing, corrupt, or declaring impossible dimensions.
    #[error("Malformed codestream: {0}")]
    MalformedStream(&'static str),

    /// The byte budget cannot hold even the coarsest discard level.
    #[error("Byte budget too small: {available} bytes available, {required} required")]
    InsufficientBudget { available: usize, required: usize },

    #[error("No codec backend is registered")]
    BackendUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Logic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Encoding failed: {0}")]
    EncodeFailed(&'static str),
}

impl J2cError {
    /// True for errors the caller can recover from by supplying more bytes.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, J2cError::InsufficientBudget { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: J2cError = io.into();
        assert!(matches!(err, J2cError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_insufficient_budget_message() {
        let err = J2cError::InsufficientBudget {
            available: 10,
            required: 79,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Byte budget too small: 10 bytes available, 79 required"
        );
    }
}

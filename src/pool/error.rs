//! Pool and relay error types

use std::fmt;

/// Error returned when a rider fails to attach to a broadcaster
#[derive(Debug, Clone)]
pub enum PoolError {
    /// The driver has already begun body output; the attach window for
    /// this key is closed
    AlreadyWriting(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::AlreadyWriting(key) => {
                write!(f, "attach window closed, already writing: {}", key)
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Failure delivered on a rider's completion signal
///
/// Diagnostic only: by the time a rider observes one of these, its sink
/// has already received a best-effort copy of the response bytes.
#[derive(Debug, Clone)]
pub enum RelayError {
    /// The driver's handler panicked or was aborted before completing
    Driver(String),
    /// This rider's own sink failed while the response was being relayed
    Sink(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Driver(msg) => write!(f, "driver failed: {}", msg),
            RelayError::Sink(msg) => write!(f, "rider sink write failed: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

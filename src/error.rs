//! Error module for the Rusty WS library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum WsError {
    /// Error for inconsistent tensor ranks or dimensions, e.g., a kernel larger than the padded input.
    ShapeError(String),
    /// Error for tensors that do not live on the same device.
    PrecisionOrLocation(String),
    /// Error for invalid parameters, e.g., a zero stride or a non-positive quantization scale.
    InvalidParameter(String),
    /// Error for I/O operations, including (de)serialization.
    IOError(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WsError::ShapeError(e) => write!(f, "Shape error: {}", e),
            WsError::PrecisionOrLocation(e) => write!(f, "Precision or location error: {}", e),
            WsError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            WsError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for WsError {}

impl From<std::io::Error> for WsError {
    fn from(e: std::io::Error) -> Self {
        WsError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for WsError {
    fn from(e: serde_json::Error) -> Self {
        WsError::IOError(e.to_string())
    }
}

use std::io;
use thiserror::Error;

use crate::device::ConnectionState;

/// The primary error type for the `ssm2-lib` library.
#[derive(Error, Debug)]
pub enum Ssm2Error {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("First byte of packet is wrong. Expected {expected:#04x}, got {actual:#04x}")]
    HeaderMismatch { expected: u8, actual: u8 },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Unexpected command: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("unable to find conversion for parameter `{parameter}` with unit `{unit}`")]
    MissingConversion { parameter: String, unit: String },

    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },

    #[error("Unsupported raw value width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Invalid expression `{expr}`: {message}")]
    Expression { expr: String, message: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Connection is {actual}, operation requires {expected}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    #[error("Transport closed")]
    TransportClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<quick_xml::Error> for Ssm2Error {
    fn from(err: quick_xml::Error) -> Self {
        Ssm2Error::Catalog(err.to_string())
    }
}

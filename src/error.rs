//! Error types for the dongle link and audio session mixer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed header: {0} bytes, expected {1}")]
    MalformedHeader(usize, usize),

    #[error("Bad header magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Header type check mismatch for type {0:#04x}")]
    TypeCheckMismatch(u32),

    #[error("Payload too short for {kind}: {len} bytes")]
    ShortPayload { kind: &'static str, len: usize },

    #[error("Payload length mismatch: header says {expected}, got {actual}")]
    PayloadLength { expected: usize, actual: usize },

    #[error("Declared payload of {0} bytes exceeds the frame limit")]
    Oversized(usize),

    #[error("Invalid JSON payload: {0}")]
    Json(String),
}

/// USB transport errors, as reported by the device backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Transfer status {0}")]
    Status(String),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Device operation failed: {0}")]
    Device(String),
}

/// Message fragments that mean the device went away underneath us.
const BENIGN_SIGNATURES: &[&str] = &[
    "LIBUSB_ERROR_NO_DEVICE",
    "LIBUSB_TRANSFER_CANCELLED",
    "LIBUSB_TRANSFER_NO_DEVICE",
    "LIBUSB_ERROR_INTERRUPTED",
    "device has been disconnected",
    "transfer was cancelled",
    "No such device",
    "aborted",
];

const PENDING_SIGNATURES: &[&str] = &["pending request", "LIBUSB_ERROR_BUSY", "Device busy"];

impl TransportError {
    fn message(&self) -> &str {
        match self {
            Self::Transfer(m) | Self::Status(m) | Self::Disconnected(m) | Self::Device(m) => m,
        }
    }

    /// True when the error is an expected consequence of unplugging or shutdown
    pub fn is_benign_disconnect(&self) -> bool {
        if matches!(self, Self::Disconnected(_)) {
            return true;
        }
        let message = self.message();
        BENIGN_SIGNATURES.iter().any(|sig| message.contains(sig))
    }

    /// True when a close failed because a transfer is still in flight
    pub fn is_pending_request(&self) -> bool {
        let message = self.message();
        PENDING_SIGNATURES.iter().any(|sig| message.contains(sig))
    }
}

/// Dongle link lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Device is not opened")]
    DeviceNotReady,

    #[error("No bulk IN/OUT endpoints found")]
    NoEndpoints,

    #[error("Operation {operation} invalid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Audio backend errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Buffer overflow")]
    BufferOverflow,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the mixing session

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is shut down")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Codec is not ready")]
    NotReady,

    #[error("Codec session already finished")]
    Finished,

    #[error("Codec worker is gone")]
    WorkerGone,
}

/// Network errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer not connected: {0}")]
    NotConnected(String),
}

/// Track management errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("Track not found: {0}")]
    NotFound(u32),

    #[error("Track {0} is already recording")]
    AlreadyRecording(u32),

    #[error("Track {0} is not recording")]
    NotRecording(u32),

    #[error("Track {0} has no decoded audio")]
    NoAudio(u32),
}

/// Inbound message errors; the message is dropped, the connection stays up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed payload for {command}: {reason}")]
    MalformedPayload { command: String, reason: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Container export errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("Unsupported bits per sample: {0}")]
    UnsupportedBitsPerSample(u16),

    #[error("Block is missing channel {0}")]
    MissingChannel(usize),

    #[error("Data too large for container: {0} bytes")]
    TooLarge(usize),

    #[error("Exporter worker is gone")]
    WorkerGone,
}

impl ProtocolError {
    pub fn malformed(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

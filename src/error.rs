// Crate error type

use std::error;
use std::fmt;
use std::io;
use std::result;

pub type RtmpResult<T> = result::Result<T, RtmpError>;

/// Error produced by the RTMP protocol stack
#[derive(Debug)]
pub enum RtmpError {
    /// Handshake failed (bad version, short exchange)
    Handshake(String),

    /// Malformed chunk header, impossible length, unknown format,
    /// unknown AMF marker or unexpected command for the session state
    Protocol(String),

    /// Payload could not be parsed (bad AVC/AAC config, NALU overflow)
    Codec(String),

    /// Queue overflow or peer socket gone
    Resource(String),

    /// Admission rejected (verify hook, command handshake not completed)
    Admission(String),

    /// Explicit close or process teardown
    Cancelled,

    /// I/O error
    Io(io::Error),
}

impl fmt::Display for RtmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtmpError::Handshake(msg) => write!(f, "handshake error: {}", msg),
            RtmpError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            RtmpError::Codec(msg) => write!(f, "codec error: {}", msg),
            RtmpError::Resource(msg) => write!(f, "resource error: {}", msg),
            RtmpError::Admission(msg) => write!(f, "admission error: {}", msg),
            RtmpError::Cancelled => write!(f, "cancelled"),
            RtmpError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for RtmpError {}

impl From<io::Error> for RtmpError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl RtmpError {
    /// Shortcut to build a Protocol error from any displayable cause
    pub fn protocol(msg: &str) -> RtmpError {
        RtmpError::Protocol(msg.to_string())
    }

    /// Shortcut to build a Codec error
    pub fn codec(msg: &str) -> RtmpError {
        RtmpError::Codec(msg.to_string())
    }

    /// Shortcut to build a Handshake error
    pub fn handshake(msg: &str) -> RtmpError {
        RtmpError::Handshake(msg.to_string())
    }

    /// True if the error only affects the offending packet,
    /// not the connection carrying it
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RtmpError::Codec(_))
    }

    /// Makes an equivalent copy, for reporting one failure through
    /// more than one channel
    pub fn duplicate(&self) -> RtmpError {
        match self {
            RtmpError::Handshake(msg) => RtmpError::Handshake(msg.clone()),
            RtmpError::Protocol(msg) => RtmpError::Protocol(msg.clone()),
            RtmpError::Codec(msg) => RtmpError::Codec(msg.clone()),
            RtmpError::Resource(msg) => RtmpError::Resource(msg.clone()),
            RtmpError::Admission(msg) => RtmpError::Admission(msg.clone()),
            RtmpError::Cancelled => RtmpError::Cancelled,
            RtmpError::Io(err) => RtmpError::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

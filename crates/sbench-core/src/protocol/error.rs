//! Protocol error type: framing violations, decode failures and state-machine
//! misuse. Classified before converting to anyhow at the session boundary.

use std::fmt;

use super::opcode::Opcode;

/// Error raised by the framing/encoding layer or by a state machine that was
/// handed an opcode its current state has no transition for.
#[derive(Debug)]
pub enum ProtocolError {
    /// Stream-level failure (read/write error, truncated frame).
    Io(std::io::Error),
    /// The frame violated the wire format (oversized, empty, bad id byte).
    Framing(String),
    /// The payload did not deserialize into the expected shape.
    Decode(String),
    /// An opcode arrived that the current state has no transition for.
    BadTransition { state: &'static str, opcode: Opcode },
    /// A message arrived that makes no sense at this point of the exchange.
    UnexpectedOpcode { opcode: Opcode, context: &'static str },
    /// `receive()` was called after the connection was switched to
    /// channel-delivery mode.
    ChannelInstalled,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "{}", e),
            ProtocolError::Framing(msg) => write!(f, "framing: {}", msg),
            ProtocolError::Decode(msg) => write!(f, "decode: {}", msg),
            ProtocolError::BadTransition { state, opcode } => {
                write!(f, "illegal transition: {:?} in state {}", opcode, state)
            }
            ProtocolError::UnexpectedOpcode { opcode, context } => {
                write!(f, "unexpected opcode {:?} while {}", opcode, context)
            }
            ProtocolError::ChannelInstalled => write!(f, "channel already installed"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

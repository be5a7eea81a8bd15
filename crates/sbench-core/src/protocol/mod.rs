//! Control-plane protocol: opcodes, length-prefixed framing, message
//! encodings and the connection transport.
//!
//! Every message on the wire is a 4-byte little-endian length prefix followed
//! by that many payload bytes. The payload is either a JSON envelope
//! (`{"command": .., "is_error"?: .., "data": ..}`, the control-plane
//! default) or the binary form (opcode id byte, flags byte, MessagePack
//! body) used for bulk stat uploads.

mod error;
mod frame;
mod message;
mod opcode;
mod transport;

pub use error::ProtocolError;
pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{decode, encode, Discovery, Encoding, GenericResponse, Received};
pub use opcode::Opcode;
pub use transport::{SessionEvent, Transport};

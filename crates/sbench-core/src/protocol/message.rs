//! Message payload encodings.
//!
//! JSON carries the control plane: `{"command": "<Opcode>", "is_error":
//! <bool?>, "data": <body>}`. The binary form carries large tables (bulk
//! stat uploads): opcode id byte, flags byte, MessagePack body. The first
//! payload byte tells them apart on receive (binary ids stay below `{`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::opcode::Opcode;

/// Payload encoding a transport (or a single send) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Binary,
}

/// Generic ack/fail body. An empty `Error` means success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericResponse {
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl GenericResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Foreman reply to a Discovery probe: sizing inputs for the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub cores: u32,
    pub ram_bytes: u64,
    pub version: String,
}

const FLAG_IS_ERROR: u8 = 0x01;

#[derive(Serialize)]
struct JsonEnvelope<'a, T: Serialize> {
    command: Opcode,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_error: Option<bool>,
    data: &'a T,
}

#[derive(Deserialize)]
struct JsonEnvelopeOwned {
    command: Opcode,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(default)]
    data: serde_json::Value,
}

/// A received, validated message. The opcode and error flag are available
/// synchronously; the body deserializes on demand into the caller's shape.
#[derive(Debug)]
pub struct Received {
    opcode: Opcode,
    is_error: bool,
    body: Body,
}

#[derive(Debug)]
enum Body {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl Received {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Deserialize the body into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        match &self.body {
            Body::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| ProtocolError::Decode(format!("{} body: {}", self.opcode, e))),
            Body::Binary(bytes) => rmp_serde::from_slice(bytes)
                .map_err(|e| ProtocolError::Decode(format!("{} body: {}", self.opcode, e))),
        }
    }
}

/// Encode one message payload (the part inside the length-prefixed frame).
pub fn encode<T: Serialize>(
    opcode: Opcode,
    is_error: bool,
    data: &T,
    encoding: Encoding,
) -> Result<Vec<u8>, ProtocolError> {
    match encoding {
        Encoding::Json => {
            let envelope = JsonEnvelope {
                command: opcode,
                is_error: if is_error { Some(true) } else { None },
                data,
            };
            serde_json::to_vec(&envelope)
                .map_err(|e| ProtocolError::Decode(format!("encode {}: {}", opcode, e)))
        }
        Encoding::Binary => {
            let body = rmp_serde::to_vec_named(data)
                .map_err(|e| ProtocolError::Decode(format!("encode {}: {}", opcode, e)))?;
            let mut payload = Vec::with_capacity(2 + body.len());
            payload.push(opcode.wire_id());
            payload.push(if is_error { FLAG_IS_ERROR } else { 0 });
            payload.extend_from_slice(&body);
            Ok(payload)
        }
    }
}

/// Decode one received payload. The encoding is recognized from the first
/// byte so a JSON control plane can still accept binary stat uploads.
pub fn decode(payload: Vec<u8>) -> Result<Received, ProtocolError> {
    let first = *payload
        .first()
        .ok_or_else(|| ProtocolError::Framing("empty payload".into()))?;

    if first == b'{' {
        let envelope: JsonEnvelopeOwned = serde_json::from_slice(&payload)
            .map_err(|e| ProtocolError::Decode(format!("envelope: {}", e)))?;
        return Ok(Received {
            opcode: envelope.command,
            is_error: envelope.is_error.unwrap_or(false),
            body: Body::Json(envelope.data),
        });
    }

    let opcode = Opcode::from_wire_id(first)
        .ok_or_else(|| ProtocolError::Framing(format!("unknown opcode id {:#04x}", first)))?;
    let flags = *payload
        .get(1)
        .ok_or_else(|| ProtocolError::Framing("binary payload missing flags byte".into()))?;
    Ok(Received {
        opcode,
        is_error: flags & FLAG_IS_ERROR != 0,
        body: Body::Binary(payload[2..].to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: u64,
    }

    #[test]
    fn json_roundtrip() {
        let probe = Probe {
            name: "alpha".into(),
            count: 7,
        };
        let payload = encode(Opcode::Discovery, false, &probe, Encoding::Json).unwrap();
        let msg = decode(payload).unwrap();
        assert_eq!(msg.opcode(), Opcode::Discovery);
        assert!(!msg.is_error());
        assert_eq!(msg.data::<Probe>().unwrap(), probe);
    }

    #[test]
    fn binary_roundtrip_with_error_flag() {
        let probe = Probe {
            name: "beta".into(),
            count: 9000,
        };
        let payload = encode(Opcode::StatDetails, true, &probe, Encoding::Binary).unwrap();
        let msg = decode(payload).unwrap();
        assert_eq!(msg.opcode(), Opcode::StatDetails);
        assert!(msg.is_error());
        assert_eq!(msg.data::<Probe>().unwrap(), probe);
    }

    #[test]
    fn json_envelope_shape_on_the_wire() {
        let payload = encode(Opcode::WriteStart, false, &(), Encoding::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["command"], "WriteStart");
        assert!(value.get("is_error").is_none());
    }

    #[test]
    fn unknown_id_byte_rejected() {
        assert!(matches!(
            decode(vec![0x1f, 0x00]),
            Err(ProtocolError::Framing(_))
        ));
        assert!(matches!(decode(Vec::new()), Err(ProtocolError::Framing(_))));
    }
}

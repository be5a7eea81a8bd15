use serde::{Deserialize, Serialize};
use std::fmt;

/// Message tag sent on every control-plane frame.
///
/// `Connect` through `Hung` flow between foreman and workers as well; the
/// rest only exist on the manager↔foreman link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Connect,
    WriteStart,
    WriteStop,
    Prepare,
    ReadStart,
    ReadStop,
    ReadWriteStart,
    ReadWriteStop,
    Delete,
    Terminate,
    Fail,
    Hung,
    Busy,
    Discovery,
    StatSummary,
    StatSummaryStart,
    StatSummaryStop,
    StatDetails,
    StatDetailsDone,
}

impl Opcode {
    /// One-byte id used by the binary encoding. Ids stay below 0x20 so the
    /// first payload byte distinguishes binary frames from JSON (`{` = 0x7b).
    pub fn wire_id(self) -> u8 {
        match self {
            Opcode::Connect => 0x01,
            Opcode::WriteStart => 0x02,
            Opcode::WriteStop => 0x03,
            Opcode::Prepare => 0x04,
            Opcode::ReadStart => 0x05,
            Opcode::ReadStop => 0x06,
            Opcode::ReadWriteStart => 0x07,
            Opcode::ReadWriteStop => 0x08,
            Opcode::Delete => 0x09,
            Opcode::Terminate => 0x0a,
            Opcode::Fail => 0x0b,
            Opcode::Hung => 0x0c,
            Opcode::Busy => 0x0d,
            Opcode::Discovery => 0x0e,
            Opcode::StatSummary => 0x0f,
            Opcode::StatSummaryStart => 0x10,
            Opcode::StatSummaryStop => 0x11,
            Opcode::StatDetails => 0x12,
            Opcode::StatDetailsDone => 0x13,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        Some(match id {
            0x01 => Opcode::Connect,
            0x02 => Opcode::WriteStart,
            0x03 => Opcode::WriteStop,
            0x04 => Opcode::Prepare,
            0x05 => Opcode::ReadStart,
            0x06 => Opcode::ReadStop,
            0x07 => Opcode::ReadWriteStart,
            0x08 => Opcode::ReadWriteStop,
            0x09 => Opcode::Delete,
            0x0a => Opcode::Terminate,
            0x0b => Opcode::Fail,
            0x0c => Opcode::Hung,
            0x0d => Opcode::Busy,
            0x0e => Opcode::Discovery,
            0x0f => Opcode::StatSummary,
            0x10 => Opcode::StatSummaryStart,
            0x11 => Opcode::StatSummaryStop,
            0x12 => Opcode::StatDetails,
            0x13 => Opcode::StatDetailsDone,
            _ => return None,
        })
    }

    /// True for the opcodes a foreman broadcasts to its workers.
    pub fn is_worker_opcode(self) -> bool {
        matches!(
            self,
            Opcode::Connect
                | Opcode::WriteStart
                | Opcode::WriteStop
                | Opcode::Prepare
                | Opcode::ReadStart
                | Opcode::ReadStop
                | Opcode::ReadWriteStart
                | Opcode::ReadWriteStop
                | Opcode::Delete
                | Opcode::Terminate
        )
    }

    /// True for the opcodes that begin a timed benchmark phase.
    pub fn starts_phase(self) -> bool {
        matches!(
            self,
            Opcode::WriteStart
                | Opcode::Prepare
                | Opcode::ReadStart
                | Opcode::ReadWriteStart
                | Opcode::Delete
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 19] = [
        Opcode::Connect,
        Opcode::WriteStart,
        Opcode::WriteStop,
        Opcode::Prepare,
        Opcode::ReadStart,
        Opcode::ReadStop,
        Opcode::ReadWriteStart,
        Opcode::ReadWriteStop,
        Opcode::Delete,
        Opcode::Terminate,
        Opcode::Fail,
        Opcode::Hung,
        Opcode::Busy,
        Opcode::Discovery,
        Opcode::StatSummary,
        Opcode::StatSummaryStart,
        Opcode::StatSummaryStop,
        Opcode::StatDetails,
        Opcode::StatDetailsDone,
    ];

    #[test]
    fn wire_ids_roundtrip_and_stay_below_json_brace() {
        for op in ALL {
            let id = op.wire_id();
            assert!(id < 0x20, "{:?} id {:#x} collides with JSON sniffing", op, id);
            assert_eq!(Opcode::from_wire_id(id), Some(op));
        }
        assert_eq!(Opcode::from_wire_id(0x7b), None);
    }

    #[test]
    fn json_names_are_variant_names() {
        let s = serde_json::to_string(&Opcode::ReadWriteStart).unwrap();
        assert_eq!(s, "\"ReadWriteStart\"");
        let op: Opcode = serde_json::from_str("\"StatDetailsDone\"").unwrap();
        assert_eq!(op, Opcode::StatDetailsDone);
    }
}

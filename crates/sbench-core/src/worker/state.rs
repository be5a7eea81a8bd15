//! Worker phase states and the legal-transition table.

use crate::protocol::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Connect,
    ConnectDone,
    Write,
    WriteDone,
    Prepare,
    PrepareDone,
    Read,
    ReadDone,
    ReadWrite,
    ReadWriteDone,
    Clean,
    CleanDone,
    Terminated,
}

impl WorkerState {
    pub fn name(self) -> &'static str {
        match self {
            WorkerState::Init => "Init",
            WorkerState::Connect => "Connect",
            WorkerState::ConnectDone => "ConnectDone",
            WorkerState::Write => "Write",
            WorkerState::WriteDone => "WriteDone",
            WorkerState::Prepare => "Prepare",
            WorkerState::PrepareDone => "PrepareDone",
            WorkerState::Read => "Read",
            WorkerState::ReadDone => "ReadDone",
            WorkerState::ReadWrite => "ReadWrite",
            WorkerState::ReadWriteDone => "ReadWriteDone",
            WorkerState::Clean => "Clean",
            WorkerState::CleanDone => "CleanDone",
            WorkerState::Terminated => "Terminated",
        }
    }

    /// True while the worker issues storage operations and must heartbeat.
    pub fn is_active_phase(self) -> bool {
        matches!(
            self,
            WorkerState::Write
                | WorkerState::Prepare
                | WorkerState::Read
                | WorkerState::ReadWrite
                | WorkerState::Clean
        )
    }
}

/// The transition table: every legal `(state, opcode) -> state` edge. All
/// phase policy lives here; anything not listed is a protocol error.
const TRANSITIONS: &[(WorkerState, Opcode, WorkerState)] = &[
    (WorkerState::Init, Opcode::Connect, WorkerState::Connect),
    (WorkerState::ConnectDone, Opcode::WriteStart, WorkerState::Write),
    (WorkerState::Write, Opcode::WriteStop, WorkerState::WriteDone),
    (WorkerState::ConnectDone, Opcode::Prepare, WorkerState::Prepare),
    (WorkerState::WriteDone, Opcode::Prepare, WorkerState::Prepare),
    (WorkerState::PrepareDone, Opcode::ReadStart, WorkerState::Read),
    (WorkerState::Read, Opcode::ReadStop, WorkerState::ReadDone),
    (WorkerState::PrepareDone, Opcode::ReadWriteStart, WorkerState::ReadWrite),
    (WorkerState::ReadWrite, Opcode::ReadWriteStop, WorkerState::ReadWriteDone),
    (WorkerState::ReadDone, Opcode::Delete, WorkerState::Clean),
    (WorkerState::ReadWriteDone, Opcode::Delete, WorkerState::Clean),
];

/// Look up the next state for an opcode, `None` when the edge is illegal.
/// `Terminate` is accepted from every state.
pub fn transition(state: WorkerState, opcode: Opcode) -> Option<WorkerState> {
    if opcode == Opcode::Terminate {
        return Some(WorkerState::Terminated);
    }
    TRANSITIONS
        .iter()
        .find(|(from, op, _)| *from == state && *op == opcode)
        .map(|(_, _, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [WorkerState; 14] = [
        WorkerState::Init,
        WorkerState::Connect,
        WorkerState::ConnectDone,
        WorkerState::Write,
        WorkerState::WriteDone,
        WorkerState::Prepare,
        WorkerState::PrepareDone,
        WorkerState::Read,
        WorkerState::ReadDone,
        WorkerState::ReadWrite,
        WorkerState::ReadWriteDone,
        WorkerState::Clean,
        WorkerState::CleanDone,
        WorkerState::Terminated,
    ];

    #[test]
    fn happy_paths_are_legal() {
        let write_then_read = [
            (WorkerState::Init, Opcode::Connect, WorkerState::Connect),
            (WorkerState::ConnectDone, Opcode::WriteStart, WorkerState::Write),
            (WorkerState::Write, Opcode::WriteStop, WorkerState::WriteDone),
            (WorkerState::WriteDone, Opcode::Prepare, WorkerState::Prepare),
            (WorkerState::PrepareDone, Opcode::ReadStart, WorkerState::Read),
            (WorkerState::Read, Opcode::ReadStop, WorkerState::ReadDone),
            (WorkerState::ReadDone, Opcode::Delete, WorkerState::Clean),
            (WorkerState::CleanDone, Opcode::Terminate, WorkerState::Terminated),
        ];
        for (from, op, to) in write_then_read {
            assert_eq!(transition(from, op), Some(to), "{:?} + {:?}", from, op);
        }
        assert_eq!(
            transition(WorkerState::PrepareDone, Opcode::ReadWriteStart),
            Some(WorkerState::ReadWrite)
        );
    }

    #[test]
    fn terminate_is_legal_everywhere() {
        for state in ALL_STATES {
            assert_eq!(
                transition(state, Opcode::Terminate),
                Some(WorkerState::Terminated)
            );
        }
    }

    #[test]
    fn everything_off_the_table_is_illegal() {
        // Spot checks for the classic mistakes.
        assert_eq!(transition(WorkerState::Init, Opcode::WriteStart), None);
        assert_eq!(transition(WorkerState::Write, Opcode::ReadStart), None);
        assert_eq!(transition(WorkerState::Read, Opcode::Delete), None);
        assert_eq!(transition(WorkerState::Terminated, Opcode::Connect), None);

        // Exhaustive: any pair answering Some must be in the table or a
        // Terminate edge.
        for state in ALL_STATES {
            for op in [
                Opcode::Connect,
                Opcode::WriteStart,
                Opcode::WriteStop,
                Opcode::Prepare,
                Opcode::ReadStart,
                Opcode::ReadStop,
                Opcode::ReadWriteStart,
                Opcode::ReadWriteStop,
                Opcode::Delete,
            ] {
                if let Some(next) = transition(state, op) {
                    assert!(
                        TRANSITIONS.contains(&(state, op, next)),
                        "{:?} + {:?} not in the table",
                        state,
                        op
                    );
                }
            }
        }
    }
}

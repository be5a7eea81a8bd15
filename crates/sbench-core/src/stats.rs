//! Per-operation stat records, the per-phase summary counter matrix, and the
//! chunked stat pool workers record into on the hot path.

use serde::{Deserialize, Serialize};

use crate::protocol::{Encoding, Opcode, ProtocolError, Transport};

/// Phase a stat was recorded in. Read/write halves of a mixed phase record as
/// `Read` and `Write` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatPhase {
    Write,
    Prepare,
    Read,
    Clean,
}

pub const NUM_PHASES: usize = 4;

impl StatPhase {
    pub fn index(self) -> usize {
        match self {
            StatPhase::Write => 0,
            StatPhase::Prepare => 1,
            StatPhase::Read => 2,
            StatPhase::Clean => 3,
        }
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Some(match i {
            0 => StatPhase::Write,
            1 => StatPhase::Prepare,
            2 => StatPhase::Read,
            3 => StatPhase::Clean,
            _ => return None,
        })
    }
}

/// Outcome classification of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatError {
    None,
    VerifyFailure,
    OperationFailure,
}

pub const NUM_ERRORS: usize = 3;

impl StatError {
    pub fn index(self) -> usize {
        match self {
            StatError::None => 0,
            StatError::VerifyFailure => 1,
            StatError::OperationFailure => 2,
        }
    }
}

/// One completed operation. Flat value type so the pool stays cache-friendly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stat {
    /// Milliseconds since the current phase started.
    pub time_since_phase_start_ms: u32,
    /// Operation duration in microseconds.
    pub duration_us: u32,
    pub phase: StatPhase,
    pub error: StatError,
    /// Which of the work order's targets served the op.
    pub target_index: u16,
    /// Which foreman recorded it; assigned by the manager.
    pub server_index: u16,
}

/// Fixed `phases x error-kinds` matrix of counters. Zeroed at phase start,
/// accumulated continuously, drained to the manager about once a second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSummary {
    counts: [[u64; NUM_ERRORS]; NUM_PHASES],
}

impl StatSummary {
    pub fn zero(&mut self) {
        self.counts = [[0; NUM_ERRORS]; NUM_PHASES];
    }

    pub fn add(&mut self, phase: StatPhase, error: StatError) {
        self.counts[phase.index()][error.index()] += 1;
    }

    pub fn merge(&mut self, other: &StatSummary) {
        for p in 0..NUM_PHASES {
            for e in 0..NUM_ERRORS {
                self.counts[p][e] += other.counts[p][e];
            }
        }
    }

    pub fn get(&self, phase: StatPhase, error: StatError) -> u64 {
        self.counts[phase.index()][error.index()]
    }

    pub fn phase_total(&self, phase: StatPhase) -> u64 {
        self.counts[phase.index()].iter().sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn error_total(&self) -> u64 {
        self.counts
            .iter()
            .map(|row| row[StatError::VerifyFailure.index()] + row[StatError::OperationFailure.index()])
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Summary plus identity; doubles as the worker heartbeat. `can_timeout` is
/// true only while the worker is inside a timed benchmark phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub can_timeout: bool,
    pub summary: StatSummary,
}

/// Maximum stats per chunk regardless of RAM.
pub const MAX_CHUNK_LEN: usize = 1 << 20;
const MIN_CHUNK_LEN: usize = 64;

/// Chunk length for one worker's pool: a quarter of physical RAM divided
/// across workers, rounded down to a power of two and capped.
pub fn chunk_len_for(ram_bytes: u64, n_workers: usize) -> usize {
    let per_worker = ram_bytes / 4 / n_workers.max(1) as u64;
    let stats = (per_worker / std::mem::size_of::<Stat>() as u64).max(1);
    let pow2 = 1usize << (63 - stats.leading_zeros() as usize).min(63);
    pow2.clamp(MIN_CHUNK_LEN, MAX_CHUNK_LEN)
}

/// Preallocated stat storage. Chunks are fixed-size and never grown or
/// copied; a full chunk just gets a successor. Clearing resets lengths
/// without freeing, so phase boundaries cost nothing on the hot path.
pub struct StatPool {
    chunk_len: usize,
    chunks: Vec<Vec<Stat>>,
}

impl StatPool {
    pub fn new(chunk_len: usize) -> Self {
        let chunk_len = chunk_len.max(1);
        Self {
            chunk_len,
            chunks: vec![Vec::with_capacity(chunk_len)],
        }
    }

    pub fn record(&mut self, stat: Stat) {
        if self
            .chunks
            .last()
            .map(|c| c.len() == self.chunk_len)
            .unwrap_or(true)
        {
            self.chunks.push(Vec::with_capacity(self.chunk_len));
        }
        self.chunks.last_mut().unwrap().push(stat);
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical clear: lengths reset, allocations kept.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stat> {
        self.chunks.iter().flatten()
    }

    /// Send every chunk (full ones, then the partial tail) as binary
    /// StatDetails messages, then clear the pool.
    pub fn upload(&mut self, transport: &Transport) -> Result<(), ProtocolError> {
        for chunk in &self.chunks {
            if !chunk.is_empty() {
                transport.send_with(Opcode::StatDetails, chunk, Encoding::Binary)?;
            }
        }
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(phase: StatPhase, error: StatError, t_ms: u32) -> Stat {
        Stat {
            time_since_phase_start_ms: t_ms,
            duration_us: 100,
            phase,
            error,
            target_index: 0,
            server_index: 0,
        }
    }

    #[test]
    fn summary_is_a_fold_of_the_stats() {
        let stats = vec![
            stat(StatPhase::Write, StatError::None, 0),
            stat(StatPhase::Write, StatError::None, 1),
            stat(StatPhase::Write, StatError::OperationFailure, 2),
            stat(StatPhase::Read, StatError::VerifyFailure, 0),
            stat(StatPhase::Read, StatError::None, 5),
        ];
        let mut summary = StatSummary::default();
        for s in &stats {
            summary.add(s.phase, s.error);
        }
        for p in 0..NUM_PHASES {
            for e in 0..NUM_ERRORS {
                let phase = StatPhase::from_index(p).unwrap();
                let expected = stats
                    .iter()
                    .filter(|s| s.phase.index() == p && s.error.index() == e)
                    .count() as u64;
                let error = match e {
                    0 => StatError::None,
                    1 => StatError::VerifyFailure,
                    _ => StatError::OperationFailure,
                };
                assert_eq!(summary.get(phase, error), expected);
            }
        }
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.error_total(), 2);
    }

    #[test]
    fn summary_merge_adds_counterwise() {
        let mut a = StatSummary::default();
        a.add(StatPhase::Write, StatError::None);
        let mut b = StatSummary::default();
        b.add(StatPhase::Write, StatError::None);
        b.add(StatPhase::Clean, StatError::OperationFailure);
        a.merge(&b);
        assert_eq!(a.get(StatPhase::Write, StatError::None), 2);
        assert_eq!(a.get(StatPhase::Clean, StatError::OperationFailure), 1);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn pool_appends_chunks_without_moving_old_ones() {
        let mut pool = StatPool::new(4);
        for i in 0..10 {
            pool.record(stat(StatPhase::Write, StatError::None, i));
        }
        assert_eq!(pool.len(), 10);
        assert_eq!(pool.chunks.len(), 3);
        assert!(pool.chunks.iter().all(|c| c.capacity() == 4));
        let times: Vec<u32> = pool.iter().map(|s| s.time_since_phase_start_ms).collect();
        assert_eq!(times, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn clear_is_logical() {
        let mut pool = StatPool::new(4);
        for i in 0..9 {
            pool.record(stat(StatPhase::Read, StatError::None, i));
        }
        let chunks_before = pool.chunks.len();
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.chunks.len(), chunks_before);
        assert!(pool.chunks.iter().all(|c| c.capacity() == 4));
    }

    #[test]
    fn chunk_sizing_is_pow2_and_capped() {
        // 4 GiB, 8 workers -> 128 Mi / 16 bytes = 8 Mi stats, capped at 1 Mi.
        assert_eq!(chunk_len_for(4 << 30, 8), MAX_CHUNK_LEN);
        let len = chunk_len_for(64 << 20, 4);
        assert!(len.is_power_of_two());
        assert!(len <= MAX_CHUNK_LEN && len >= 64);
        // Tiny RAM still yields a usable chunk.
        assert_eq!(chunk_len_for(1024, 16), MIN_CHUNK_LEN);
    }
}

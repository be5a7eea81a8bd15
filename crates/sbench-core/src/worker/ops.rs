//! The hot-loop op bodies: generate/put, get/verify, mixed, delete.

use anyhow::{Context, Result};
use rand::Rng;
use std::time::Instant;

use super::Worker;
use crate::backend;
use crate::generator;
use crate::stats::{Stat, StatError, StatPhase};

impl Worker {
    /// Build the generator, buffers and one connection per target. Any
    /// failure here is fatal to the job.
    pub(super) fn establish(&mut self) -> Result<()> {
        let generator = generator::create(
            &self.order.generator_kind,
            self.order.seed,
            &self.order.generator_config,
        )?;
        let size = self.order.object_size as usize;
        self.buffer = vec![0u8; size];
        self.scratch = vec![0u8; size];
        self.generator = Some(generator);

        for target in &self.order.targets {
            let mut conn =
                backend::create(&self.order.connection_kind, target, &self.order.protocol_config)
                    .with_context(|| format!("create connection to {}", target))?;
            conn.worker_connect()
                .with_context(|| format!("connect to {}", target))?;
            self.connections.push(conn);
        }
        self.object_index = self.order.range_start;
        Ok(())
    }

    /// One write op. Returns true when the object index wrapped (one full
    /// pass over the range), which completes a Prepare phase.
    pub(super) fn write_or_prepare(&mut self, phase: StatPhase) -> bool {
        // Prepare runs unthrottled; it is completion-driven, not timed.
        if phase != StatPhase::Prepare {
            self.governor.pace(self.order.object_size, &mut self.rng);
        }

        let id = self.object_index;
        let generator = self.generator.as_ref().expect("connected before phase ops");
        generator.generate(id, self.cycle, &mut self.buffer);

        let conn_index = self.next_connection;
        self.next_connection = (self.next_connection + 1) % self.connections.len();
        let conn = &mut self.connections[conn_index];
        let key = if conn.requires_key() {
            format!("{}-{}", self.order.object_key_prefix, id)
        } else {
            String::new()
        };

        let start = Instant::now();
        let result = conn.put_object(&key, id, &self.buffer);
        let duration = start.elapsed();

        let error = match result {
            Ok(()) => StatError::None,
            Err(e) => {
                tracing::debug!(worker = self.id, id, "put failed: {}", e);
                StatError::OperationFailure
            }
        };
        self.record(phase, error, start, duration, conn_index as u16);
        self.advance()
    }

    /// One read op, with algorithmic verification unless the order skips it.
    pub(super) fn read(&mut self) {
        self.governor.pace(self.order.object_size, &mut self.rng);

        let id = self.object_index;
        let conn_index = self.next_connection;
        self.next_connection = (self.next_connection + 1) % self.connections.len();
        let conn = &mut self.connections[conn_index];
        let key = if conn.requires_key() {
            format!("{}-{}", self.order.object_key_prefix, id)
        } else {
            String::new()
        };

        let start = Instant::now();
        let result = conn.get_object(&key, id, &mut self.buffer);
        let duration = start.elapsed();

        let error = match result {
            Ok(()) => {
                if self.order.skip_read_validation {
                    StatError::None
                } else {
                    let generator = self.generator.as_ref().expect("connected before phase ops");
                    match generator.verify(id, &self.buffer, &mut self.scratch) {
                        Ok(()) => StatError::None,
                        Err(e) => {
                            tracing::debug!(worker = self.id, id, "verify failed: {}", e);
                            StatError::VerifyFailure
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(worker = self.id, id, "get failed: {}", e);
                StatError::OperationFailure
            }
        };
        self.record(StatPhase::Read, error, start, duration, conn_index as u16);

        if self.advance() {
            // Next pass re-reads the same objects; defeat client caches now.
            for conn in &mut self.connections {
                if let Err(e) = conn.invalidate_cache() {
                    tracing::warn!(worker = self.id, "invalidate {}: {}", conn.target(), e);
                }
            }
        }
    }

    /// Mixed phase: a uniform draw against the mix percentage picks the op.
    pub(super) fn read_write(&mut self) {
        let draw: u8 = self.rng.gen_range(0..100);
        if draw < self.order.read_write_mix {
            self.read();
        } else {
            self.write_or_prepare(StatPhase::Write);
        }
    }

    /// One delete op. Failures count but do not stop the sweep. Returns true
    /// once the whole range has been covered.
    pub(super) fn clean(&mut self) -> bool {
        let id = self.object_index;
        let conn_index = self.next_connection;
        self.next_connection = (self.next_connection + 1) % self.connections.len();
        let conn = &mut self.connections[conn_index];
        let key = if conn.requires_key() {
            format!("{}-{}", self.order.object_key_prefix, id)
        } else {
            String::new()
        };

        let start = Instant::now();
        let result = conn.delete_object(&key, id);
        let duration = start.elapsed();

        let error = match result {
            Ok(()) => StatError::None,
            Err(e) => {
                tracing::debug!(worker = self.id, id, "delete failed: {}", e);
                StatError::OperationFailure
            }
        };
        self.record(StatPhase::Clean, error, start, duration, conn_index as u16);
        self.advance()
    }

    /// Step the object index; on passing the range end, wrap and bump the
    /// cycle counter so rewrites produce different bytes.
    fn advance(&mut self) -> bool {
        self.object_index += 1;
        if self.object_index >= self.order.range_end {
            self.object_index = self.order.range_start;
            self.cycle += 1;
            return true;
        }
        false
    }

    fn record(
        &mut self,
        phase: StatPhase,
        error: StatError,
        started_at: Instant,
        duration: std::time::Duration,
        target_index: u16,
    ) {
        let stat = Stat {
            time_since_phase_start_ms: started_at
                .duration_since(self.phase_start)
                .as_millis()
                .min(u32::MAX as u128) as u32,
            duration_us: duration.as_micros().min(u32::MAX as u128) as u32,
            phase,
            error,
            target_index,
            server_index: self.order.server_index,
        };
        self.pool.record(stat);
        self.summary.add(phase, error);
        self.emit_summary(false);
    }
}

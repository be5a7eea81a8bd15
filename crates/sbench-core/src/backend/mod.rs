//! Storage backends.
//!
//! The worker drives everything through the `Connection` trait; the cluster
//! drivers (s3, rados, rbd, cephfs, block) plug in behind the same surface
//! and are not part of this build. The registry names them so the error is
//! explicit. `memory` and `file` are the concrete drivers shipped here.

mod file;
mod memory;

use std::collections::HashMap;
use thiserror::Error;

pub use file::FileConnection;
pub use memory::{store_for, MemStore, MemoryConnection};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("object {key}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("backend kind {0} is not built into this binary")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

/// One storage endpoint as seen by a single worker (or, for bucket lifecycle,
/// by the manager). Calls are synchronous; timing happens around them.
pub trait Connection: Send {
    fn target(&self) -> &str;

    /// Manager-side session: create the bucket/pool/dir if needed.
    fn manager_connect(&mut self) -> Result<(), BackendError>;
    /// Manager-side teardown. With `cleanup`, removes the bucket only if this
    /// tool created it.
    fn manager_close(&mut self, cleanup: bool) -> Result<(), BackendError>;

    fn worker_connect(&mut self) -> Result<(), BackendError>;
    fn worker_close(&mut self) -> Result<(), BackendError>;

    /// Whether objects are addressed by a string key (vs. raw id).
    fn requires_key(&self) -> bool;
    fn can_delete(&self) -> bool;

    fn put_object(&mut self, key: &str, id: u64, buf: &[u8]) -> Result<(), BackendError>;
    fn get_object(&mut self, key: &str, id: u64, buf: &mut [u8]) -> Result<(), BackendError>;
    fn delete_object(&mut self, key: &str, id: u64) -> Result<(), BackendError>;

    /// Defeat client-side caches before re-reading the same objects.
    fn invalidate_cache(&mut self) -> Result<(), BackendError>;
}

/// Construct a connection for one target of the work order.
pub fn create(
    kind: &str,
    target: &str,
    protocol_config: &HashMap<String, String>,
) -> Result<Box<dyn Connection>, BackendError> {
    match kind {
        "memory" => Ok(Box::new(MemoryConnection::new(target, protocol_config))),
        "file" => Ok(Box::new(FileConnection::new(target))),
        "s3" | "rados" | "rbd" | "cephfs" | "block" => {
            Err(BackendError::Unsupported(kind.to_string()))
        }
        other => Err(BackendError::Unsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_kinds_are_named_but_rejected() {
        for kind in ["s3", "rados", "rbd", "cephfs", "block", "nonsense"] {
            match create(kind, "t", &HashMap::new()) {
                Err(err) => assert!(matches!(err, BackendError::Unsupported(_)), "{}", kind),
                Ok(_) => panic!("{}", kind),
            }
        }
    }

    #[test]
    fn shipped_kinds_construct() {
        assert!(create("memory", "t", &HashMap::new()).is_ok());
        assert!(create("file", "/tmp/sbench-x", &HashMap::new()).is_ok());
    }
}

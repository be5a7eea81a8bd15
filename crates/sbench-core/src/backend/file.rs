//! Local-filesystem backend: one file per object under the target directory.
//!
//! Worker connect runs through the mount coordinator so many workers
//! targeting the same directory prepare it exactly once; for this backend the
//! "mount" step is directory creation, but the coordination is the same one a
//! remote-filesystem driver uses.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::{BackendError, Connection};
use crate::mount::MountManager;

pub struct FileConnection {
    dir: PathBuf,
    target: String,
    created: bool,
    mounted: bool,
}

impl FileConnection {
    pub fn new(target: &str) -> Self {
        Self {
            dir: PathBuf::from(target),
            target: target.to_string(),
            created: false,
            mounted: false,
        }
    }

    fn object_path(&self, key: &str, id: u64) -> PathBuf {
        if key.is_empty() {
            self.dir.join(id.to_string())
        } else {
            self.dir.join(key)
        }
    }
}

fn prepare_dir(dir: &Path) -> Result<(), BackendError> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

impl Connection for FileConnection {
    fn target(&self) -> &str {
        &self.target
    }

    fn manager_connect(&mut self) -> Result<(), BackendError> {
        // Relative targets are foreman-local (resolved under each foreman's
        // mounts dir); the manager only prepares paths it can see itself.
        if self.dir.is_absolute() && !self.dir.exists() {
            prepare_dir(&self.dir)?;
            self.created = true;
        }
        Ok(())
    }

    fn manager_close(&mut self, cleanup: bool) -> Result<(), BackendError> {
        // Only remove a directory this tool created; pre-existing ones stay.
        if cleanup && self.created {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn worker_connect(&mut self) -> Result<(), BackendError> {
        let mounts = MountManager::global();
        if mounts.acquire(&self.dir) {
            let result = prepare_dir(&self.dir);
            mounts.mount_complete(&self.dir, result.is_ok());
            result?;
        }
        self.mounted = true;
        Ok(())
    }

    fn worker_close(&mut self) -> Result<(), BackendError> {
        if self.mounted {
            let mounts = MountManager::global();
            if mounts.release(&self.dir) {
                // Nothing to tear down for a local directory.
                mounts.unmount_complete(&self.dir);
            }
            self.mounted = false;
        }
        Ok(())
    }

    fn requires_key(&self) -> bool {
        true
    }

    fn can_delete(&self) -> bool {
        true
    }

    fn put_object(&mut self, key: &str, id: u64, buf: &[u8]) -> Result<(), BackendError> {
        let path = self.object_path(key, id);
        let mut file = std::fs::File::create(&path)?;
        // Short writes advance and continue; only a true error aborts.
        let mut off = 0;
        while off < buf.len() {
            let n = file.write(&buf[off..])?;
            if n == 0 {
                return Err(BackendError::Failed(format!(
                    "{}: wrote 0 bytes at offset {}",
                    path.display(),
                    off
                )));
            }
            off += n;
        }
        Ok(())
    }

    fn get_object(&mut self, key: &str, id: u64, buf: &mut [u8]) -> Result<(), BackendError> {
        let path = self.object_path(key, id);
        let mut file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(path.display().to_string())
            } else {
                BackendError::Io(e)
            }
        })?;
        let expected = buf.len() as u64;
        let found = file.metadata()?.len();
        if found != expected {
            return Err(BackendError::SizeMismatch {
                key: path.display().to_string(),
                expected,
                found,
            });
        }
        file.read_exact(buf)?;
        Ok(())
    }

    fn delete_object(&mut self, key: &str, id: u64) -> Result<(), BackendError> {
        let path = self.object_path(key, id);
        std::fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(path.display().to_string())
            } else {
                BackendError::Io(e)
            }
        })
    }

    #[cfg(unix)]
    fn invalidate_cache(&mut self) -> Result<(), BackendError> {
        use std::os::unix::io::AsRawFd;
        // Ask the kernel to drop page-cache entries for every object file.
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Ok(file) = std::fs::File::open(entry.path()) {
                unsafe {
                    libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED);
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn invalidate_cache(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

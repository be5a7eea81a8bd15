//! Foreman daemon settings: an XDG config file overlaid with command-line
//! flags, validated before the daemon binds anything.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Threads-per-core above this is a config typo, not a tuning choice.
const MAX_WORKER_FACTOR: f64 = 32.0;

/// Settings read from `~/.config/sbench/config.toml`. Every key is optional
/// in the file (a file with just `port = 7000` is valid); unknown keys are
/// rejected so typos fail loudly instead of silently falling back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port the foreman daemon listens on.
    pub port: u16,
    /// Absolute directory remote filesystems are mounted under; relative
    /// file-backend targets in a work order resolve here.
    pub mounts_dir: PathBuf,
    /// Workers per core when a work order does not carry a factor.
    pub worker_factor: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5150,
            mounts_dir: default_mounts_dir(),
            worker_factor: 1.0,
        }
    }
}

/// Command-line flags that win over file values.
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub port: Option<u16>,
    pub mounts_dir: Option<PathBuf>,
}

impl ServerConfig {
    fn apply(&mut self, overrides: ServerOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(mounts_dir) = overrides.mounts_dir {
            self.mounts_dir = mounts_dir;
        }
    }

    /// Reject settings the daemon cannot serve with, before it binds a
    /// socket or a manager finds it.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port 0 would pick a random port; managers need a fixed one");
        }
        if !self.worker_factor.is_finite() || self.worker_factor <= 0.0 {
            bail!("worker_factor {} is not a positive number", self.worker_factor);
        }
        if self.worker_factor > MAX_WORKER_FACTOR {
            bail!(
                "worker_factor {} would spawn {}x the core count in worker threads",
                self.worker_factor,
                self.worker_factor as u64
            );
        }
        if !self.mounts_dir.is_absolute() {
            bail!(
                "mounts_dir {} must be absolute; the daemon's working directory is not stable",
                self.mounts_dir.display()
            );
        }
        Ok(())
    }
}

/// Default mounts dir under the XDG state home, falling back to /tmp when no
/// home is available (e.g. a bare daemon user).
fn default_mounts_dir() -> PathBuf {
    xdg::BaseDirectories::with_prefix("sbench")
        .map(|d| d.get_state_home().join("mounts"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/sbench-mounts"))
}

/// Commented starter config; parses back to the defaults.
fn template_toml() -> String {
    let defaults = ServerConfig::default();
    format!(
        "# sbench foreman daemon settings. Command-line flags override these.\n\
         \n\
         # TCP port managers dial.\n\
         port = {}\n\
         \n\
         # Absolute directory remote filesystems are mounted under; relative\n\
         # file-backend targets in a work order resolve here.\n\
         mounts_dir = {:?}\n\
         \n\
         # Workers per core when a work order does not set its own factor.\n\
         worker_factor = {:.1}\n",
        defaults.port, defaults.mounts_dir, defaults.worker_factor
    )
}

/// Resolve, read, overlay and validate the daemon settings. A missing file
/// is seeded with a commented template on first run, and the mounts dir is
/// created so the first job's relative targets resolve without racing the
/// mount coordinator.
pub fn load(overrides: ServerOverrides) -> Result<ServerConfig> {
    let dirs = xdg::BaseDirectories::with_prefix("sbench").context("locate XDG directories")?;
    let path = dirs
        .place_config_file("config.toml")
        .context("place config file")?;

    let mut cfg = match fs::read_to_string(&path) {
        Ok(text) => toml::from_str::<ServerConfig>(&text)
            .with_context(|| format!("parse {}", path.display()))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::write(&path, template_toml())
                .with_context(|| format!("seed config template {}", path.display()))?;
            tracing::info!("wrote starter config to {}", path.display());
            ServerConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };

    cfg.apply(overrides);
    cfg.validate()?;
    fs::create_dir_all(&cfg.mounts_dir)
        .with_context(|| format!("create mounts dir {}", cfg.mounts_dir.display()))?;
    Ok(cfg)
}

//! Foreman: the benchmarking daemon.
//!
//! Accepts exactly one manager session at a time, runs one pool of workers
//! per job, and keeps serving managers until told to stop. The exception is
//! a worker hang, where the honest move is to exit and let a supervisor
//! restart the process.

mod hang;
mod session;
mod stats_task;

use anyhow::{Context, Result};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::protocol::{Encoding, Transport};

pub use hang::{HungError, HANG_TIMEOUT_FLOOR, HANG_TIMEOUT_INITIAL};

#[derive(Debug, Clone)]
pub struct ForemanConfig {
    pub port: u16,
    /// Relative file-backend targets are resolved under this directory.
    pub mounts_dir: PathBuf,
    /// Worker factor used when the work order carries none.
    pub worker_factor: f64,
    /// Initial per-worker liveness budget. Production leaves this alone;
    /// tests shrink it.
    pub hang_timeout: Duration,
    /// Exit the process on a hang (crash-for-restart). Tests disable this.
    pub exit_on_hang: bool,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            port: 5150,
            mounts_dir: std::env::temp_dir().join("sbench-mounts"),
            worker_factor: 1.0,
            hang_timeout: HANG_TIMEOUT_INITIAL,
            exit_on_hang: true,
        }
    }
}

impl ForemanConfig {
    pub fn from_server_config(cfg: &ServerConfig) -> Self {
        Self {
            port: cfg.port,
            mounts_dir: cfg.mounts_dir.clone(),
            worker_factor: cfg.worker_factor,
            ..Self::default()
        }
    }
}

pub struct Foreman {
    config: ForemanConfig,
    listener: TcpListener,
}

impl Foreman {
    /// Bind the listen socket. Port 0 picks an ephemeral port; read it back
    /// with `local_port`.
    pub fn bind(config: ForemanConfig) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .with_context(|| format!("bind foreman port {}", config.port))?;
        Ok(Self { config, listener })
    }

    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.config.port)
    }

    /// Serve manager sessions until the accept loop dies. Never returns in
    /// normal daemon operation.
    pub async fn run(self) -> Result<()> {
        let Foreman { config, listener } = self;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(config.port);

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("foreman-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(s) => {
                            if control_tx.send(s).is_err() {
                                return;
                            }
                        }
                        Err(e) => tracing::warn!("accept failed: {}", e),
                    }
                }
            })
            .context("spawn accept thread")?;

        tracing::info!(port, "foreman ready");
        loop {
            let Some(stream) = control_rx.recv().await else {
                return Ok(());
            };
            let transport = match Transport::from_stream(stream, Encoding::Json) {
                Ok(t) => Arc::new(t),
                Err(e) => {
                    tracing::warn!("dropping connection: {}", e);
                    continue;
                }
            };
            tracing::info!(peer = transport.peer(), "manager session opened");
            match session::run(Arc::clone(&transport), &config, &mut control_rx).await {
                Ok(()) => tracing::info!("session ended, ready for the next manager"),
                Err(e) => {
                    if e.downcast_ref::<HungError>().is_some() {
                        tracing::error!("{:#}; exiting so a supervisor can restart", e);
                        if config.exit_on_hang {
                            std::process::exit(1);
                        }
                        return Err(e);
                    }
                    tracing::warn!("session failed: {:#}", e);
                }
            }
        }
    }
}

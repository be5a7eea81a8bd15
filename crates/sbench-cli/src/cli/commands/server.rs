//! `sbench server`: the foreman daemon.

use anyhow::Result;
use std::path::PathBuf;

use sbench_core::config::{self, ServerOverrides};
use sbench_core::foreman::{Foreman, ForemanConfig};

pub async fn run(port: Option<u16>, mounts_dir: Option<PathBuf>) -> Result<()> {
    let cfg = config::load(ServerOverrides { port, mounts_dir })?;
    tracing::debug!("server config: {:?}", cfg);

    let foreman = Foreman::bind(ForemanConfig::from_server_config(&cfg))?;
    foreman.run().await
}

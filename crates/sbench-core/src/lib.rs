pub mod config;
pub mod logging;

pub mod backend;
pub mod foreman;
pub mod generator;
pub mod hostinfo;
pub mod manager;
pub mod mount;
pub mod protocol;
pub mod report;
pub mod stats;
pub mod workorder;
pub mod worker;

/// Crate version carried in Discovery replies so the manager can warn on
/// mixed-version fleets.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Logging init: stderr with env-filter, verbosity mapped from the CLI flag.

use tracing_subscriber::EnvFilter;

/// Map the `-v` CLI level to a default filter directive. `RUST_LOG` always wins.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,sbench=info",
        1 => "info,sbench=info",
        2 => "info,sbench=debug",
        _ => "debug,sbench=trace",
    }
}

/// Initialize structured logging to stderr. ANSI is off so daemon logs stay
/// clean when redirected to a file by a supervisor.
pub fn init_logging(verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_directives() {
        assert_eq!(default_directive(0), "warn,sbench=info");
        assert_eq!(default_directive(2), "info,sbench=debug");
        assert_eq!(default_directive(9), "debug,sbench=trace");
    }
}

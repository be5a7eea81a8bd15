use clap::Parser;
use sbench_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging as early as possible; verbosity comes from -v.
    logging::init_logging(cli.verbose);

    if let Err(err) = cli::dispatch(cli).await {
        eprintln!("sbench error: {:#}", err);
        std::process::exit(1);
    }
}

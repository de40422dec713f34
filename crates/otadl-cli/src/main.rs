use otadl_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    match logging::init_logging() {
        Ok(path) => tracing::debug!(path = %path.display(), "logging to file"),
        Err(err) => {
            logging::init_logging_stderr();
            tracing::warn!("file logging unavailable, using stderr: {:#}", err);
        }
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("otadl error: {:#}", err);
        std::process::exit(1);
    }
}

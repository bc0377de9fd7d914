//! Subcommand dispatch and execution.
//!
//! [`dispatch`] routes the parsed CLI to [`run`], [`init`], [`validate`]
//! or [`health`]. Each handler lives in its own submodule.

pub mod health;
pub mod init;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::CrossoverError;

pub async fn dispatch(cli: Cli) -> Result<(), CrossoverError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Init(ref args)) => init::execute(args),
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  crossover v{version}: usage telemetry and rate limiting in front of your API\n\n  \
         No command provided. To get started:\n\n    \
         crossover init                  Generate a starter config\n    \
         crossover validate              Check ./crossover.yaml\n    \
         crossover run                   Start the proxy (auto-detects ./crossover.yaml)\n    \
         crossover --help                See all commands and options\n"
    );
}

//! STEMwerk CLI
//!
//! Command-line interface for probing compute devices and running stem
//! separation jobs.

use clap::Parser;
use env_logger::Env;
use log::debug;

use stemwerk::cli::commands::{self, SeparateArgs};
use stemwerk::cli::{Cli, Commands};
use stemwerk::StemwerkError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    debug!("STEMwerk v{}", env!("CARGO_PKG_VERSION"));

    let python = cli.python.as_deref();
    let result = match cli.command {
        Commands::Devices { json } => commands::devices(python, json),
        Commands::Interpreter { strict } => commands::interpreter(python, strict),
        Commands::Separate {
            input,
            start,
            end,
            model,
            stems,
            preset,
            device,
            output,
        } => commands::separate(
            python,
            SeparateArgs {
                input,
                start,
                end,
                model,
                stems,
                preset,
                device,
                output,
            },
        ),
    };

    result.map_err(|err| {
        let hint = err
            .downcast_ref::<StemwerkError>()
            .and_then(StemwerkError::recovery_suggestion);
        match hint {
            Some(hint) => anyhow::anyhow!("{:#}\nhint: {}", err, hint),
            None => err,
        }
    })
}

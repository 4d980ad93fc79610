mod cli;
mod cli_utils;
mod commands;
mod config;
mod logging;
mod merger;
mod script;
mod xdg;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;

use cli::{Cli, Commands};
use cli_utils::scriptbin_prefix;
use script::{HandoffMode, ScriptError};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => report(&err),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let common = &cli.common;
    match &cli.command {
        Some(Commands::Run(args)) => commands::run::run(common, args).await,
        Some(Commands::Build(args)) => commands::build::build(common, args).await,
        Some(Commands::Cache(args)) => commands::cache::cache(common, args).await,
        None => {
            // Shebang form: scriptbin <script> [args...]
            let Some((script, args)) = cli.script.split_first() else {
                Cli::command()
                    .error(
                        clap::error::ErrorKind::MissingRequiredArgument,
                        "a script path or a subcommand is required",
                    )
                    .exit()
            };
            commands::run::run_script(common, &PathBuf::from(script), args, HandoffMode::native())
                .await
        }
    }
}

/// Print a launcher fault and pick the exit code for it
fn report(err: &anyhow::Error) -> i32 {
    let script_err = err.downcast_ref::<ScriptError>();

    if let Some((stdout, stderr)) = script_err.and_then(ScriptError::build_output) {
        script::executor::relay(stdout, stderr);
    }
    eprintln!("{} error: {:#}", scriptbin_prefix(), err);

    script_err.map(ScriptError::exit_code).unwrap_or(1)
}

mod blueprint;
mod cli;
mod commands;
mod config;
mod deployment;
mod kind;
mod paths;
mod progress;
mod provider;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{BudgetCommand, Cli, Command};
use commands::CommandStatus;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config_path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config_path: paths::expand(&cli.config.to_string_lossy()),
    };

    match run(&ctx, cli.command) {
        Ok(CommandStatus::Success) => ExitCode::SUCCESS,
        Ok(CommandStatus::Partial { failed }) => {
            ui::error(&format!("{} did not finish:", failed.len()));
            for id in &failed {
                eprintln!("  {id}");
            }
            ExitCode::from(1)
        }
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<CommandStatus> {
    match command {
        Command::Plan(args) => commands::deploy::plan(ctx, &args),
        Command::Apply(args) => commands::deploy::apply(ctx, &args),
        Command::Destroy(args) => commands::deploy::destroy(ctx, &args),
        Command::Status => commands::inspect::status(ctx),
        Command::Outputs(args) => commands::inspect::outputs(ctx, &args),
        Command::Graph(args) => commands::inspect::graph(ctx, &args),
        Command::Budget(cmd) => match cmd {
            BudgetCommand::Register => commands::budget::register(ctx),
            BudgetCommand::Notify { amount, name } => {
                commands::budget::notify(ctx, amount, name.as_deref())
            }
            BudgetCommand::Watch => commands::budget::watch(ctx),
        },
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "rigger", &mut io::stdout());
            Ok(CommandStatus::Success)
        }
    }
}

/// 1 when an engine error stopped a run midway, 2 when nothing was changed
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<declarative::Error>() {
        Some(e) if !e.is_preflight() => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code() {
        let preflight = anyhow::Error::new(declarative::Error::config("region", "missing"));
        assert_eq!(exit_code(&preflight), 2);

        let setup = anyhow::anyhow!("Not running in a terminal");
        assert_eq!(exit_code(&setup), 2);

        let midway = anyhow::Error::new(declarative::Error::Cancelled);
        assert_eq!(exit_code(&midway), 1);
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }
}

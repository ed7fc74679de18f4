use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "rigger")]
#[command(version)]
#[command(about = "Declarative infrastructure with budget-triggered teardown", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deployment configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "RIGGER_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Preview what apply would change
    Plan(GraphArgs),

    /// Create or update resources
    Apply(ApplyArgs),

    /// Delete resources, dependents first
    Destroy(DestroyArgs),

    /// Show recorded state of every graph
    Status,

    /// Show outputs of created resources
    Outputs(OutputsArgs),

    /// Show graph order and waves
    Graph(GraphViewArgs),

    /// Manage the budget guard
    #[command(subcommand)]
    Budget(BudgetCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct GraphArgs {
    /// Only this graph (full id or suffix, e.g. "compute")
    pub graph: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Only this graph (full id or suffix, e.g. "compute")
    pub graph: Option<String>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of nodes provisioned in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Only this graph (full id or suffix, e.g. "compute")
    pub graph: Option<String>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct OutputsArgs {
    /// Only this graph (full id or suffix, e.g. "compute")
    pub graph: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct GraphViewArgs {
    /// Only this graph (full id or suffix, e.g. "compute")
    pub graph: Option<String>,

    /// Print Graphviz DOT
    #[arg(long)]
    pub dot: bool,
}

#[derive(Subcommand)]
pub enum BudgetCommand {
    /// Create the budget rule or attach to the existing one
    Register,

    /// Report spend; tears down attached graphs above the threshold
    Notify {
        /// Actual spend
        #[arg(long)]
        amount: f64,

        /// Budget name (defaults to the configured rule)
        #[arg(long)]
        name: Option<String>,
    },

    /// Read alerts as JSON lines from stdin
    Watch,
}

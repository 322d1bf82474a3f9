use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "deeppentest",
    about = "Plan-driven penetration testing over a supervised remote shell",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run instruction text through the configured shell session
    Exec {
        /// File holding the instruction text, or "-" for stdin
        input: String,

        /// Action tag attached to the instruction
        #[arg(long, default_value = "Shell")]
        action: String,

        /// Print the {context, response} record as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Inspect and edit plan files
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// Drive a plan with the operator as the planner
    Run {
        /// Plan file (created if missing)
        plan: PathBuf,

        /// Goal for a new plan
        #[arg(long)]
        goal: Option<String>,
    },

    /// Generate shell completion script
    Completions {
        /// Shell to generate completions for
        shell: CompletionShell,
    },

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanCommand {
    /// Print tasks in execution order with their status
    Show {
        plan: PathBuf,
    },

    /// Create a plan file from a proposal
    Init {
        plan: PathBuf,

        /// Goal the plan works towards
        #[arg(long)]
        goal: String,

        /// File holding the proposal text, or "-" for stdin
        proposal: String,
    },

    /// Merge a revised proposal into a plan
    Merge {
        plan: PathBuf,

        /// File holding the proposal text, or "-" for stdin
        proposal: String,
    },

    /// Mark a task finished
    Record(RecordArgs),
}

#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("verdict").required(true).args(["success", "failed"]))]
pub struct RecordArgs {
    pub plan: PathBuf,

    /// Task sequence number
    pub sequence: usize,

    #[arg(long)]
    pub success: bool,

    #[arg(long)]
    pub failed: bool,

    /// File holding the task result text
    #[arg(long)]
    pub result: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

//! Command-line interface definitions for `shellpilot`.

use clap::{ArgAction, Parser};
use clap_complete::Shell;

/// Run a command and explain its failure with AI
#[derive(Parser, Debug)]
#[command(
    name = "shellpilot",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SHELLPILOT_GIT_SHA"), ")"),
    about,
    long_about = None,
    disable_version_flag = true,
    arg_required_else_help = true
)]
#[command(
    after_help = "EXAMPLES:\n    shellpilot npm run build\n    shellpilot node index.js\n    shellpilot --clear-cache\n\nNOTES:\n    Reads the API key from SHELLPILOT_OPENAI_KEY (a .env file works too),\n    otherwise from ~/.shellpilot/config.json, otherwise asks for one.\n    Repeated failures are answered from a 24 hour cache."
)]
pub struct Cli {
    /// Command to run, followed by its arguments
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,

    /// Remove all cached diagnoses and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}

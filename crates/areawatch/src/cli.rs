//! Clap derive structures for the `areawatch` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// areawatch -- live country-area data from a sync server
#[derive(Debug, Parser)]
#[command(
    name = "areawatch",
    version,
    about = "Query and watch country-area data from an areawatch sync server",
    long_about = "Connects to an areawatch server over WebSocket, authenticates with a token,\n\
        and keeps a local copy of country areas up to date from search results\n\
        and server pushes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "AREAWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// WebSocket endpoint, ws:// or wss:// (overrides profile)
    #[arg(long, short = 'e', env = "AREAWATCH_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Authentication token
    #[arg(long, env = "AREAWATCH_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "AREAWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "AREAWATCH_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Tab-separated, one record per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search for countries and print their areas
    #[command(alias = "s")]
    Search(SearchArgs),

    /// Keep a live table of country areas
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Search ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search terms; each one is sent as a separate query
    #[arg(required = true, value_name = "TERM")]
    pub terms: Vec<String>,

    /// Print the whole area table instead of only the matched records
    #[arg(long)]
    pub all: bool,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show these country ids (repeatable)
    #[arg(long = "country", short = 'c', value_name = "ID")]
    pub countries: Vec<String>,

    /// Only show countries with at least this area
    #[arg(long, value_name = "KM2")]
    pub min_area: Option<f64>,

    /// Searches to run once authenticated, to seed the table
    #[arg(long = "search", short = 's', value_name = "TERM")]
    pub searches: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive profile setup
    Init,

    /// Display the current configuration
    Show,

    /// Print the config file location
    Path,

    /// Store a profile's token in the system keyring
    SetToken {
        /// Profile to update (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

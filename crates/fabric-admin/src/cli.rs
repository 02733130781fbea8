//! Clap derive structures for the `fabric-admin` CLI.
//!
//! Defines the command tree, global flags, and shared value parsers.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fabric-admin -- mirror devices between fabrics through a bridge
#[derive(Debug, Parser)]
#[command(
    name = "fabric-admin",
    version,
    about = "Synchronize and monitor devices bridged between fabrics",
    long_about = "Administrator for a fabric bridge.\n\n\
        Synchronizes device identity from a remote fabric, keeps live\n\
        subscriptions to each device's commissioning state, and drives\n\
        reverse commissioning through the remote bridge.",
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
    /// Fabric profile to use
    #[arg(long, short = 'p', env = "FABRIC_SYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FABRIC_SYNC_OUTPUT",
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
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
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
    /// Run the bridge layer against an in-process simulated fabric
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SIMULATE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of simulated devices (node ids start at 0x10)
    #[arg(
        long,
        short = 'n',
        default_value = "3",
        value_parser = clap::value_parser!(u16).range(1..=512)
    )]
    pub devices: u16,

    /// Treat NODE as an intermittently connected device (repeatable)
    #[arg(long, value_name = "NODE", value_parser = parse_node_id)]
    pub icd: Vec<u64>,

    /// Make NODE unreachable before synchronizing (repeatable)
    #[arg(long, value_name = "NODE", value_parser = parse_node_id)]
    pub unreachable: Vec<u64>,

    /// Longest wait for subscriptions to deliver their first report, in milliseconds
    #[arg(long, value_name = "MS", default_value = "250")]
    pub settle_ms: u64,
}

/// First node id handed out by `simulate`.
pub const FIRST_SIMULATED_NODE: u64 = 0x10;

/// Parse a node id in decimal or `0x`-prefixed hex.
pub fn parse_node_id(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    match parsed {
        Ok(0) => Err("node id 0 is not operational".into()),
        Ok(id) => Ok(id),
        Err(e) => Err(format!("invalid node id '{raw}': {e}")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the current resolved configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long, short = 'f')]
        force: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

use clap::{Args, Parser, Subcommand};

/// The main CLI structure for the chainlog gateway.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Defines the available subcommands for the application.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync scheduler for every configured (ledger, source) pair until Ctrl+C.
    Run(ConfigArgs),
    /// Synchronize one window for a single (ledger, source) pair and print the report.
    Sync(SyncCmd),
    /// Broadcast a signed raw transaction and wait for its confirmation.
    Submit(SubmitCmd),
    /// Print stored events of a (ledger, source) pair as JSON lines.
    Events(EventsCmd),
    /// Print the current head of every configured ledger.
    Health(ConfigArgs),
}

/// Arguments shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the gateway configuration TOML file.
    /// If not provided, default values will be used.
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncCmd {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long)]
    pub ledger: String,
    #[arg(long)]
    pub source: String,
    /// Overrides the configured step size for this run.
    #[arg(long)]
    pub step_size: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SubmitCmd {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long)]
    pub ledger: String,
    /// The signed transaction, hex encoded (a `0x` prefix is optional).
    #[arg(long)]
    pub raw_tx: String,
}

#[derive(Args, Debug)]
pub struct EventsCmd {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long)]
    pub ledger: String,
    #[arg(long)]
    pub source: String,
    #[arg(long, default_value_t = 0)]
    pub from_block: u64,
    #[arg(long, default_value_t = u64::MAX)]
    pub to_block: u64,
}

impl Commands {
    pub fn config_args(&self) -> &ConfigArgs {
        match self {
            Commands::Run(args) | Commands::Health(args) => args,
            Commands::Sync(cmd) => &cmd.config,
            Commands::Submit(cmd) => &cmd.config,
            Commands::Events(cmd) => &cmd.config,
        }
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pobj",
    about = "Inspect and edit persisted objects",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub store: StoreArgs,

    /// TOML file with a [store] table naming the record
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Which record to operate on. Overrides the config file field by field.
#[derive(Args, Debug, Default)]
pub struct StoreArgs {
    /// Record file (JSON payload in a checksummed envelope)
    #[arg(long, global = true, conflicts_with_all = ["defaults", "key"])]
    pub file: Option<PathBuf>,

    /// Defaults database file
    #[arg(long, global = true)]
    pub defaults: Option<PathBuf>,

    /// Key of the record in the defaults database
    #[arg(long, global = true)]
    pub key: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the stored value as JSON
    Show,
    /// Replace the stored value and save it
    Set(SetArgs),
    /// Delete the stored value
    Clear,
    /// Dump the raw record with its envelope header
    Inspect,
}

#[derive(Args)]
pub struct SetArgs {
    /// New value, as JSON
    pub json: String,
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "skeep - client for the skeepd secret daemon")]
pub struct Args {
    /// Path to the daemon's Unix socket
    #[clap(
        short = 's',
        long = "socketfile",
        value_name = "PATH",
        env = "SKEEP_SOCKETFILE"
    )]
    pub socketfile: PathBuf,

    /// Output details about the request; specify multiple times for more
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a secret's raw value to stdout
    Get { key: String },

    /// Store a secret, from the argument or (binary-safe) from stdin
    Set { key: String, value: Option<String> },
}

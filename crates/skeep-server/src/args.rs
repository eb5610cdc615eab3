use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "skeepd - local secret-keeper daemon")]
pub struct Args {
    /// Path to the configuration file
    #[clap(short = 'c', long, value_name = "FILE", env = "SKEEPD_CONFIG")]
    pub config: PathBuf,

    /// Log request-level detail; repeat for trace output
    #[clap(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Print the resolved configuration as JSON and exit
    #[clap(long)]
    pub dumpconfig: bool,
}

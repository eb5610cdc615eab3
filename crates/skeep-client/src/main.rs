//! The `skeep` CLI: `get` streams a secret's raw bytes to stdout,
//! `set` stores a value from the command line or stdin.

use std::io::{Read, Write};

use clap::Parser;
use skeep_client::args::{Args, Command};
use skeep_client::{Client, ClientError};
use tracing::{debug, error};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter};

fn main() {
    let args = Args::parse();
    enable_logging(&args);
    debug!("command line: {args:?}");

    let client = Client::new(&args.socketfile);
    let code = match &args.command {
        Command::Get { key } => run_get(&client, key),
        Command::Set { key, value } => run_set(&client, key, value.as_deref()),
    };
    std::process::exit(code);
}

fn run_get(client: &Client, key: &str) -> i32 {
    match client.get(key) {
        Ok(Some(value)) => {
            let mut stdout = std::io::stdout();
            if stdout.write_all(&value).and_then(|()| stdout.flush()).is_err() {
                return 2;
            }
            0
        }
        Ok(None) => {
            debug!("no such secret '{key}'");
            1
        }
        Err(e) => {
            error!("get '{key}': {e}");
            2
        }
    }
}

fn run_set(client: &Client, key: &str, value: Option<&str>) -> i32 {
    let value = match value {
        Some(value) => value.as_bytes().to_vec(),
        None => {
            let mut buffer = Vec::new();
            if let Err(e) = std::io::stdin().read_to_end(&mut buffer) {
                error!("reading value from stdin: {e}");
                return 2;
            }
            buffer
        }
    };

    match client.set(key, &value) {
        Ok(()) => 0,
        Err(e @ ClientError::Rejected(_)) => {
            error!("set '{key}': {e}");
            1
        }
        Err(e) => {
            error!("set '{key}': {e}");
            2
        }
    }
}

fn enable_logging(args: &Args) {
    let verbosity = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        3.. => tracing::Level::TRACE,
    };

    let filters = filter::Targets::new().with_default(verbosity);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(filters);

    tracing_subscriber::registry().with(fmt_layer).init();
}

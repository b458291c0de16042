//! Dukto CLI - LAN file and text transfer
//!
//! Dukto finds other machines on the local network by UDP broadcast and
//! sends them files, folders or text over TCP, speaking the same protocol
//! as the original Dukto desktop clients.
//!
//! ## Quick Start
//!
//! ```bash
//! # Receive (and announce this machine)
//! dukto listen
//!
//! # See who is around
//! dukto scan
//!
//! # Send files or a text
//! dukto send 192.168.1.20 ./photos ./notes.txt
//! dukto send 192.168.1.20 --text "hello"
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]
#![allow(clippy::cast_precision_loss)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Listen(args) => commands::listen::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,dukto=info,dukto_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

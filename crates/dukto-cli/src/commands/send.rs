//! Send command implementation.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dukto_core::connection::parse_host_address;
use dukto_core::file::{format_size, LocalFileStore};
use dukto_core::session::SCREENSHOT_NAME;
use dukto_core::transfer::{Outgoing, Sender, TransferEvent};

use super::listen::percentage;
use super::SendArgs;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let target = parse_host_address(&args.host)?;

    let outgoing = if let Some(text) = args.text {
        Outgoing::Text(text)
    } else if let Some(image) = args.screen {
        Outgoing::file_named(image, SCREENSHOT_NAME)
    } else {
        Outgoing::files(args.paths)
    };

    let options = config
        .protocol_options()
        .context("Invalid configuration")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = Sender::prepare(
        Arc::new(LocalFileStore::new()),
        outgoing,
        tx,
        options.transfer,
    )
    .context("Failed to prepare transfer")?;

    if !args.quiet {
        println!();
        println!("Dukto v{}", dukto_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!(
            "  Sending {} element(s), {} to {}",
            sender.session().total_elements,
            format_size(sender.session().total_bytes),
            target
        );
        println!();
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let start_time = Instant::now();
    let task = tokio::spawn(sender.send_to(target, cancel));

    let quiet = args.quiet;
    while let Some(event) = rx.recv().await {
        if !quiet {
            display_event(&event);
        }
        if event.is_terminal() {
            break;
        }
    }

    task.await.context("Send task failed")??;

    if !quiet {
        println!();
        println!(
            "  Transfer complete in {:.1}s",
            start_time.elapsed().as_secs_f64()
        );
        println!();
    }
    Ok(())
}

fn display_event(event: &TransferEvent) {
    match event {
        TransferEvent::Started { .. } => println!("  Connected, starting transfer..."),
        TransferEvent::Progress {
            total_bytes,
            done_bytes,
        } => {
            print!(
                "\r  [{:>6.2}%] {} of {}    ",
                percentage(*done_bytes, *total_bytes),
                format_size(*done_bytes),
                format_size(*total_bytes)
            );
            let _ = io::stdout().flush();
        }
        TransferEvent::Aborted { error } => {
            println!();
            println!("  Transfer failed: {}", error);
        }
        TransferEvent::ElementCompleted { .. }
        | TransferEvent::DirectoryReceived { .. }
        | TransferEvent::FileReceived { .. }
        | TransferEvent::TextReceived { .. }
        | TransferEvent::Completed => {}
    }
}

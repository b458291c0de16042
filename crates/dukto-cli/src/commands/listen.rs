//! Listen command implementation.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use dukto_core::file::{format_size, LocalFileStore};
use dukto_core::session::{ProtocolEvent, SessionCoordinator};

use super::ListenArgs;

/// Run the listen command.
pub async fn run(args: ListenArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(output) = args.output {
        config.general.dest_dir = Some(output);
    }
    if args.name.is_some() {
        config.general.buddy_name = args.name;
    }

    let options = config
        .protocol_options()
        .context("Invalid configuration")?;
    let identity = config.identity();
    let dest_dir = options.dest_dir.clone();

    let (coordinator, handle, mut events) =
        SessionCoordinator::bind(options, identity.clone(), Arc::new(LocalFileStore::new()))
            .await
            .context("Failed to start listening")?;
    let running = tokio::spawn(coordinator.run());

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "status": "listening",
                "port": handle.local_port(),
                "signature": identity.signature(),
                "dest_dir": dest_dir,
            })
        );
    } else {
        println!();
        println!("Dukto v{}", dukto_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Announcing as: {}", identity);
        println!("  Port:          {}", handle.local_port());
        println!("  Saving to:     {}", dest_dir.display());
        println!();
        println!("  Press Ctrl-C to stop.");
        println!();
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) if args.json => print_json(&event)?,
                Some(event) => print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                if !args.json {
                    println!();
                    println!("  Saying goodbye...");
                }
                handle.close_servers()?;
                break;
            }
        }
    }

    running.await.context("Coordinator task failed")?;
    Ok(())
}

fn print_event(event: &ProtocolEvent) {
    match event {
        ProtocolEvent::PeerAdded(peer) => {
            println!("  + {} ({}:{})", peer.name, peer.address, peer.port);
        }
        ProtocolEvent::PeerRemoved(peer) => println!("  - {} ({})", peer.name, peer.address),
        ProtocolEvent::ReceiveStarted { address } => {
            println!("  Receiving from {}...", address);
        }
        ProtocolEvent::TransferStatus {
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
        ProtocolEvent::ReceiveFileCompleted { name, size, .. } => {
            println!("\r  [file] {} ({})", name, format_size(*size));
        }
        ProtocolEvent::ReceiveDirCompleted { name, .. } => println!("\r  [dir]  {}/", name),
        ProtocolEvent::ReceiveTextCompleted(text) => {
            println!("\r  [text]");
            for line in text.lines() {
                println!("    {}", line);
            }
        }
        ProtocolEvent::ReceiveCompleted => println!("  Transfer complete!"),
        ProtocolEvent::ReceiveAborted(reason) => println!("\r  Transfer failed: {}", reason),
        ProtocolEvent::SendStarted { .. }
        | ProtocolEvent::ElementCompleted { .. }
        | ProtocolEvent::SendCompleted
        | ProtocolEvent::SendFailed(_)
        | ProtocolEvent::SendAborted => {}
    }
}

fn print_json(event: &ProtocolEvent) -> Result<()> {
    let value = match event {
        ProtocolEvent::PeerAdded(peer) => serde_json::json!({ "event": "peer_added", "peer": peer }),
        ProtocolEvent::PeerRemoved(peer) => {
            serde_json::json!({ "event": "peer_removed", "peer": peer })
        }
        ProtocolEvent::ReceiveStarted { address } => {
            serde_json::json!({ "event": "receive_started", "address": address })
        }
        ProtocolEvent::TransferStatus {
            total_bytes,
            done_bytes,
        } => serde_json::json!({
            "event": "progress",
            "total_bytes": total_bytes,
            "done_bytes": done_bytes,
        }),
        ProtocolEvent::ElementCompleted { name } => {
            serde_json::json!({ "event": "element_completed", "name": name })
        }
        ProtocolEvent::ReceiveFileCompleted { name, path, size } => serde_json::json!({
            "event": "file_received",
            "name": name,
            "path": path,
            "size": size,
        }),
        ProtocolEvent::ReceiveDirCompleted { name, path } => serde_json::json!({
            "event": "directory_received",
            "name": name,
            "path": path,
        }),
        ProtocolEvent::ReceiveTextCompleted(text) => {
            serde_json::json!({ "event": "text_received", "text": text })
        }
        ProtocolEvent::ReceiveCompleted => serde_json::json!({ "event": "receive_completed" }),
        ProtocolEvent::ReceiveAborted(reason) => {
            serde_json::json!({ "event": "receive_aborted", "error": reason })
        }
        ProtocolEvent::SendStarted { .. }
        | ProtocolEvent::SendCompleted
        | ProtocolEvent::SendFailed(_)
        | ProtocolEvent::SendAborted => return Ok(()),
    };
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

/// Percentage of `done` in `total`, 100 for empty sessions.
pub fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64) * 100.0
    }
}

//! Scan command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

use dukto_core::discovery::{Peer, PeerDirectory};

use super::ScanArgs;
use crate::ui::{parse_duration, truncate_string};

/// Pause after a failed receive before trying the socket again.
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Run the scan command.
///
/// Binds an ephemeral port so it can run next to a listening instance; the
/// hello then carries that port and peers reply to it directly.
pub async fn run(args: ScanArgs) -> Result<()> {
    let config = super::load_config();

    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '5s', '10s', '30s'")?;

    if !args.json {
        println!();
        println!("Scanning for peers ({})...", args.duration);
        println!();
    }

    let mut directory =
        PeerDirectory::bind(0, &config.identity()).context("Failed to create discovery socket")?;
    directory
        .say_hello()
        .await
        .context("Failed to broadcast hello")?;

    let deadline = Instant::now() + duration;
    while let Ok(event) = tokio::time::timeout_at(deadline, directory.next_event()).await {
        if let Err(e) = event {
            tracing::debug!("Discovery receive failed: {}", e);
            if !back_off(deadline).await {
                break;
            }
        }
    }

    if let Err(e) = directory.say_goodbye().await {
        tracing::debug!("Goodbye broadcast failed: {}", e);
    }

    let peers = directory.peers();
    if args.json {
        output_json_peers(&peers)?;
    } else {
        display_peers(&peers);
    }
    Ok(())
}

/// Sleep for [`ERROR_BACKOFF`], or until `deadline` if that comes first.
///
/// Returns whether time is left before the deadline.
async fn back_off(deadline: Instant) -> bool {
    let wake = Instant::now() + ERROR_BACKOFF;
    if wake >= deadline {
        tokio::time::sleep_until(deadline).await;
        return false;
    }
    tokio::time::sleep_until(wake).await;
    true
}

/// Output peers as JSON.
fn output_json_peers(peers: &[Peer]) -> Result<()> {
    let output = serde_json::json!({ "peers": peers });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Display peers as text table.
fn display_peers(peers: &[Peer]) {
    println!("Peers on Network:");
    println!("{}", "─".repeat(60));
    println!("  {:32}  {:16}  {:6}", "Name", "Address", "Port");
    println!("{}", "─".repeat(60));

    if peers.is_empty() {
        println!("  (no peers found)");
        println!("{}", "─".repeat(60));
        return;
    }

    for peer in peers {
        println!(
            "  {:32}  {:16}  {:6}",
            truncate_string(&peer.name, 32),
            peer.address.to_string(),
            peer.port
        );
    }

    println!("{}", "─".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_back_off_waits_between_errors() {
        let start = Instant::now();
        let deadline = start + Duration::from_secs(1);

        let mut retries = 0;
        while back_off(deadline).await {
            retries += 1;
        }

        assert_eq!(retries, 3);
        assert_eq!(Instant::now(), deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_off_stops_at_deadline() {
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(!back_off(deadline).await);
        assert_eq!(Instant::now(), deadline);
    }
}

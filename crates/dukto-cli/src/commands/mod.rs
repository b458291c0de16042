//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to
/// defaults and logs why.
pub fn load_config() -> dukto_core::config::Config {
    dukto_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("{}; using default configuration", e);
        dukto_core::config::Config::default()
    })
}

pub mod config;
pub mod listen;
pub mod scan;
pub mod send;

/// Dukto - LAN file and text transfer
#[derive(Parser)]
#[command(name = "dukto")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Announce this machine and receive incoming transfers
    Listen(ListenArgs),

    /// Send files, a text or a screenshot to a peer
    Send(SendArgs),

    /// List peers announcing themselves on the network
    Scan(ScanArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the listen command
#[derive(Parser)]
pub struct ListenArgs {
    /// Directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Port for discovery and transfers
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Name announced instead of the login name
    #[arg(long)]
    pub name: Option<String>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
#[command(group(
    clap::ArgGroup::new("payload")
        .required(true)
        .args(["paths", "text", "screen"]),
))]
pub struct SendArgs {
    /// Receiver as IP or IP:PORT
    pub host: String,

    /// Files and folders to send
    pub paths: Vec<PathBuf>,

    /// Send a text instead of files
    #[arg(short, long)]
    pub text: Option<String>,

    /// Send an image under the name Screenshot.jpg
    #[arg(long, value_name = "IMAGE")]
    pub screen: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// Duration to scan (e.g., 5s, 10s)
    #[arg(short, long, default_value = "5s")]
    pub duration: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_requires_a_payload() {
        assert!(Cli::try_parse_from(["dukto", "send", "10.0.0.2"]).is_err());

        let cli = Cli::try_parse_from(["dukto", "send", "10.0.0.2", "--text", "hi"])
            .expect("text send parses");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.text.as_deref(), Some("hi"));
        assert!(args.paths.is_empty());
    }

    #[test]
    fn test_send_rejects_mixed_payloads() {
        let result = Cli::try_parse_from([
            "dukto", "send", "10.0.0.2", "a.txt", "--text", "hi",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_listen_defaults() {
        let cli = Cli::try_parse_from(["dukto", "listen"]).expect("parse");
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert!(args.port.is_none());
        assert!(!args.json);
    }
}

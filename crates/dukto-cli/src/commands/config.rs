//! Config command implementation.

use anyhow::{Context, Result};

use dukto_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => show(),
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
            Ok(())
        }
    }
}

fn show() -> Result<()> {
    let config = super::load_config();
    let content = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("# {}", Config::config_path().display());
    println!("# receiving into {}", config.dest_dir().display());
    println!("# announcing as \"{}\"", config.identity());
    println!();
    print!("{content}");
    Ok(())
}

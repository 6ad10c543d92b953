use clap::{Args, Subcommand};
use std::path::Path;

use super::OutputFormat;
use crate::config::Config;

const CONFIG_TEMPLATE: &str = r#"# fieldsync configuration

# Local database (defaults to the platform data directory)
# database_path: ~/.local/share/fieldsync/fieldsync.db

sync:
  # server_url: "http://localhost:8080"
  # api_key: "your-api-key"
  probe_interval_secs: 15
  quiet_period_ms: 2000
  max_attempts: 5
  request_timeout_secs: 10
"#;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a commented config file to the default location
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let mut shown = config.clone();
                shown.sync.api_key = shown.sync.api_key.as_deref().map(mask);

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&shown)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &shown.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", shown.database_path.value.display());
                        println!("  source: {}", shown.database_path.source);
                        println!();

                        let sync = &shown.sync;
                        println!("sync:");
                        println!(
                            "  server_url: {}",
                            sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  api_key: {}",
                            sync.api_key.as_deref().unwrap_or("(not set)")
                        );
                        println!("  probe_interval_secs: {}", sync.probe_interval_secs);
                        println!("  quiet_period_ms: {}", sync.quiet_period_ms);
                        println!("  max_attempts: {}", sync.max_attempts);
                        println!("  request_timeout_secs: {}", sync.request_timeout_secs);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init { force } => {
                let path = Config::default_config_path();
                write_template(&path, *force)?;
                println!("Wrote config template to {}", path.display());
                Ok(())
            }
        }
    }
}

fn write_template(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

/// Keeps the last four characters of a secret.
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

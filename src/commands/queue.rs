use clap::{Args, Subcommand};

use super::{Engine, OutputFormat};

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List pending changes in replay order
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Drop a pending change without sending it
    Clear {
        /// Queue entry ID
        id: String,
    },

    /// Reset the attempt count of a change so it is retried
    Reset {
        /// Queue entry ID
        id: String,
    },
}

impl QueueCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let queue = engine.queue();

        match &self.command {
            QueueSubcommand::List { format } => {
                let entries = queue.list().await?;

                if entries.is_empty() {
                    println!("No pending changes");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<38}  {:<7}  {:<8}  {:<38}  {:<8}  QUEUED",
                            "ID", "KIND", "TYPE", "RECORD", "ATTEMPTS"
                        );
                        println!("{}", "-".repeat(130));
                        for op in &entries {
                            let attempts = if op.exhausted {
                                format!("{}!", op.attempts)
                            } else {
                                op.attempts.to_string()
                            };
                            println!(
                                "{:<38}  {:<7}  {:<8}  {:<38}  {:<8}  {}",
                                op.id,
                                op.kind().as_str(),
                                op.entity_type().as_str(),
                                op.record_id(),
                                attempts,
                                op.timestamp.format("%Y-%m-%d %H:%M:%S")
                            );
                            if let Some(error) = &op.last_error {
                                println!("    last error: {}", error);
                            }
                        }
                        println!("\nTotal: {} change(s)", entries.len());
                    }
                }
                Ok(())
            }

            QueueSubcommand::Clear { id } => {
                if queue.remove(id).await? {
                    println!("Cleared queue entry: {}", id);
                    Ok(())
                } else {
                    Err(format!("Queue entry not found: {}", id).into())
                }
            }

            QueueSubcommand::Reset { id } => {
                if queue.reset(id).await? {
                    println!("Queue entry {} will be retried on the next sync", id);
                    Ok(())
                } else {
                    Err(format!("Queue entry not found: {}", id).into())
                }
            }
        }
    }
}

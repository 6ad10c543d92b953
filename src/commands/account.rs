use clap::{Args, Subcommand};

use fieldsync_core::{Account, AccountPatch};

use super::{pending_note, truncate, Engine, OutputFormat};

#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub command: AccountSubcommand,
}

#[derive(Subcommand)]
pub enum AccountSubcommand {
    /// Create a new account
    Add {
        /// Account name
        name: String,

        /// Industry
        #[arg(long)]
        industry: Option<String>,

        /// Website URL
        #[arg(long)]
        website: Option<String>,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// List all accounts
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an account's details
    Show {
        /// Account ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing account
    Update {
        /// Account ID
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New industry
        #[arg(long)]
        industry: Option<String>,

        /// New website URL
        #[arg(long)]
        website: Option<String>,

        /// New phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// Delete an account
    Delete {
        /// Account ID
        id: String,
    },
}

impl AccountCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let accounts = engine.facade().accounts();

        match &self.command {
            AccountSubcommand::Add {
                name,
                industry,
                website,
                phone,
            } => {
                if name.trim().is_empty() {
                    return Err("Account name cannot be empty".into());
                }

                let mut account = Account::new(name.trim());
                account.industry = industry.clone();
                account.website = website.clone();
                account.phone = phone.clone();

                let created = accounts.create(account).await?;
                println!("Created account {}{}:", created.id, pending_note(&created));
                print!("{}", created.payload);
                Ok(())
            }

            AccountSubcommand::List { format } => {
                let all = accounts.get_all().await?;

                if all.is_empty() {
                    println!("No accounts found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&all)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<38}  {:<30}  INDUSTRY", "ID", "NAME");
                        println!("{}", "-".repeat(86));
                        for account in &all {
                            println!(
                                "{:<38}  {:<30}  {}",
                                account.id,
                                truncate(&account.payload.name, 30),
                                account.payload.industry.as_deref().unwrap_or("-")
                            );
                        }
                        println!("\nTotal: {} account(s)", all.len());
                    }
                }
                Ok(())
            }

            AccountSubcommand::Show { id, format } => match accounts.get(id).await? {
                Some(account) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&account)?);
                        }
                        OutputFormat::Text => {
                            println!("ID: {}{}", account.id, pending_note(&account));
                            print!("{}", account.payload);
                        }
                    }
                    Ok(())
                }
                None => Err(format!("Account not found: {}", id).into()),
            },

            AccountSubcommand::Update {
                id,
                name,
                industry,
                website,
                phone,
            } => {
                let patch = AccountPatch {
                    name: name.clone(),
                    industry: industry.clone(),
                    website: website.clone(),
                    phone: phone.clone(),
                };
                if patch == AccountPatch::default() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let updated = accounts.update(id, patch).await?;
                println!("Updated account {}:", updated.id);
                print!("{}", updated.payload);
                Ok(())
            }

            AccountSubcommand::Delete { id } => {
                accounts.delete(id).await?;
                println!("Deleted account: {}", id);
                Ok(())
            }
        }
    }
}

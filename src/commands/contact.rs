use clap::{Args, Subcommand};

use fieldsync_core::{Contact, ContactPatch};

use super::{pending_note, truncate, Engine, OutputFormat};

#[derive(Args)]
pub struct ContactCommand {
    #[command(subcommand)]
    pub command: ContactSubcommand,
}

#[derive(Subcommand)]
pub enum ContactSubcommand {
    /// Create a new contact
    Add {
        /// First name
        first_name: String,

        /// Last name
        last_name: String,

        /// Account this contact belongs to (server or pending local ID)
        #[arg(long)]
        account: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// List contacts
    List {
        /// Only contacts of this account
        #[arg(long)]
        account: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a contact's details
    Show {
        /// Contact ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing contact
    Update {
        /// Contact ID
        id: String,

        /// Move to another account
        #[arg(long)]
        account: Option<String>,

        /// New first name
        #[arg(long)]
        first_name: Option<String>,

        /// New last name
        #[arg(long)]
        last_name: Option<String>,

        /// New email address
        #[arg(long)]
        email: Option<String>,

        /// New phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// Delete a contact
    Delete {
        /// Contact ID
        id: String,
    },
}

impl ContactCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let contacts = engine.facade().contacts();

        match &self.command {
            ContactSubcommand::Add {
                first_name,
                last_name,
                account,
                email,
                phone,
            } => {
                if first_name.trim().is_empty() || last_name.trim().is_empty() {
                    return Err("First and last name cannot be empty".into());
                }

                if let Some(account_id) = account {
                    if engine.facade().accounts().get(account_id).await?.is_none() {
                        return Err(format!("Account not found: {}", account_id).into());
                    }
                }

                let mut contact = Contact::new(first_name.trim(), last_name.trim());
                contact.account_id = account.clone();
                contact.email = email.clone();
                contact.phone = phone.clone();

                let created = contacts.create(contact).await?;
                println!("Created contact {}{}:", created.id, pending_note(&created));
                print!("{}", created.payload);
                Ok(())
            }

            ContactSubcommand::List { account, format } => {
                let mut all = contacts.get_all().await?;
                if let Some(account_id) = account {
                    let account_id = engine.store().resolve_id(account_id).await?;
                    all.retain(|c| c.payload.account_id.as_deref() == Some(account_id.as_str()));
                }

                if all.is_empty() {
                    println!("No contacts found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&all)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<38}  {:<28}  EMAIL", "ID", "NAME");
                        println!("{}", "-".repeat(86));
                        for contact in &all {
                            println!(
                                "{:<38}  {:<28}  {}",
                                contact.id,
                                truncate(&contact.payload.full_name(), 28),
                                contact.payload.email.as_deref().unwrap_or("-")
                            );
                        }
                        println!("\nTotal: {} contact(s)", all.len());
                    }
                }
                Ok(())
            }

            ContactSubcommand::Show { id, format } => match contacts.get(id).await? {
                Some(contact) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&contact)?);
                        }
                        OutputFormat::Text => {
                            println!("ID: {}{}", contact.id, pending_note(&contact));
                            print!("{}", contact.payload);
                        }
                    }
                    Ok(())
                }
                None => Err(format!("Contact not found: {}", id).into()),
            },

            ContactSubcommand::Update {
                id,
                account,
                first_name,
                last_name,
                email,
                phone,
            } => {
                let patch = ContactPatch {
                    account_id: account.clone(),
                    first_name: first_name.clone(),
                    last_name: last_name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                };
                if patch == ContactPatch::default() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let updated = contacts.update(id, patch).await?;
                println!("Updated contact {}:", updated.id);
                print!("{}", updated.payload);
                Ok(())
            }

            ContactSubcommand::Delete { id } => {
                contacts.delete(id).await?;
                println!("Deleted contact: {}", id);
                Ok(())
            }
        }
    }
}

//! ADS Vault command-line driver.
//!
//! Every invocation opens the vault from the data directory, applies the
//! requested commands and waits for the durable writes before exiting.
//! Signing goes through the relay exactly like a page would.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use zeroize::Zeroizing;

use adsvault_app_lib::vault::{FileStore, VaultCommand, WriteTicket};
use adsvault_app_lib::{init_tracing, keys, load_config, AppState};

/// ADS Vault
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding the sealed vault record
    #[arg(long, env = "ADSVAULT_DATA_DIR", default_value = "adsvault-data")]
    data_dir: PathBuf,

    /// Config file (defaults to config.json inside the data directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vault password
    #[arg(long, env = "ADSVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh 24-word seed phrase
    Phrase,
    /// Create the vault, generating a seed phrase unless one is given
    Create {
        #[arg(long)]
        seed_phrase: Option<String>,
    },
    /// Show whether the vault exists and is sealed
    Status,
    /// List keys and accounts
    Keys,
    AddAccount {
        #[arg(long)]
        address: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        public_key: String,
    },
    UpdateAccount {
        #[arg(long)]
        address: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        public_key: String,
    },
    RemoveAccount {
        #[arg(long)]
        address: String,
    },
    SelectAccount {
        #[arg(long)]
        address: String,
    },
    /// Import an externally generated keypair
    ImportKey {
        #[arg(long)]
        name: String,
        #[arg(long)]
        secret_key: String,
        #[arg(long)]
        public_key: String,
    },
    /// Sign hex-encoded data with an account key, through the relay
    Sign {
        #[arg(long)]
        address: String,
        #[arg(long)]
        data: String,
    },
    /// Permanently delete the vault
    Erase {
        #[arg(long)]
        yes: bool,
    },
}

impl Args {
    fn password(&self) -> Result<Zeroizing<String>> {
        self.password
            .clone()
            .map(Zeroizing::new)
            .context("A password is required (--password or ADSVAULT_PASSWORD)")
    }
}

async fn wait(ticket: Option<WriteTicket>) -> Result<()> {
    if let Some(ticket) = ticket {
        ticket.wait().await.context("Failed to persist vault")?;
    }
    Ok(())
}

async fn unseal(app: &AppState, args: &Args) -> Result<()> {
    let ticket = app
        .dispatch(VaultCommand::Unseal {
            password: args.password()?,
        })
        .await
        .context("Failed to unseal vault")?;
    wait(ticket).await
}

/// Unseal, apply one mutating command and wait for it to be stored.
async fn mutate(app: &AppState, args: &Args, command: VaultCommand) -> Result<()> {
    unseal(app, args).await?;
    let name = command.name();
    let ticket = app
        .dispatch(command)
        .await
        .with_context(|| format!("{} failed", name))?;
    wait(ticket).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    if let Command::Phrase = args.command {
        let phrase = keys::generate_seed_phrase()?;
        println!("{}", phrase.as_str());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join("config.json"));
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let store = FileStore::new(&args.data_dir)
        .with_context(|| format!("Failed to open data directory {:?}", args.data_dir))?;

    info!("Using data directory {:?}", args.data_dir);
    let app = AppState::init(config, Arc::new(store)).await?;

    match &args.command {
        Command::Phrase => {}
        Command::Create { seed_phrase } => {
            let phrase = match seed_phrase {
                Some(phrase) => Zeroizing::new(phrase.clone()),
                None => {
                    let phrase = keys::generate_seed_phrase()?;
                    println!("Write down your seed phrase:\n\n{}\n", phrase.as_str());
                    Zeroizing::new(phrase.as_str().to_string())
                }
            };
            let ticket = app
                .dispatch(VaultCommand::Create {
                    password: args.password()?,
                    seed_phrase: phrase,
                })
                .await
                .context("Failed to create vault")?;
            wait(ticket).await?;
            println!("Vault created");
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&app.status().await)?);
        }
        Command::Keys => {
            unseal(&app, &args).await?;
            let store = app.vault.read().await;
            let Some(secrets) = store.vault().secrets() else {
                bail!("Vault is sealed");
            };
            let listing = json!({
                "keys": secrets.keys.iter().map(|k| json!({"name": k.name, "publicKey": k.public_key})).collect::<Vec<_>>(),
                "importedKeys": secrets.imported_keys.iter().map(|k| json!({"name": k.name, "publicKey": k.public_key})).collect::<Vec<_>>(),
                "accounts": secrets.accounts.iter().map(|a| json!({"address": a.address, "name": a.name, "publicKey": a.public_key})).collect::<Vec<_>>(),
                "selectedAccount": secrets.selected_account,
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Command::AddAccount {
            address,
            name,
            public_key,
        } => {
            let command = VaultCommand::AddAccount {
                password: args.password()?,
                address: address.clone(),
                name: name.clone(),
                public_key: public_key.clone(),
            };
            mutate(&app, &args, command).await?;
            println!("Account {} added", address.to_uppercase());
        }
        Command::UpdateAccount {
            address,
            name,
            public_key,
        } => {
            let command = VaultCommand::UpdateAccount {
                password: args.password()?,
                address: address.clone(),
                name: name.clone(),
                public_key: public_key.clone(),
            };
            mutate(&app, &args, command).await?;
            println!("Account {} updated", address.to_uppercase());
        }
        Command::RemoveAccount { address } => {
            let command = VaultCommand::RemoveAccount {
                password: args.password()?,
                address: address.clone(),
            };
            mutate(&app, &args, command).await?;
            println!("Account {} removed", address.to_uppercase());
        }
        Command::SelectAccount { address } => {
            let command = VaultCommand::SelectAccount {
                password: args.password()?,
                address: address.clone(),
            };
            mutate(&app, &args, command).await?;
            println!("Account {} selected", address.to_uppercase());
        }
        Command::ImportKey {
            name,
            secret_key,
            public_key,
        } => {
            let command = VaultCommand::ImportKey {
                password: args.password()?,
                name: name.clone(),
                secret_key: Zeroizing::new(secret_key.clone()),
                public_key: public_key.clone(),
            };
            mutate(&app, &args, command).await?;
            println!("Key {} imported", name);
        }
        Command::Sign { address, data } => {
            unseal(&app, &args).await?;
            let mut page = app.connect_page().await?;
            let id = uuid::Uuid::new_v4().to_string();
            page.send(json!({"type": "sign", "id": id, "address": address, "data": data}))
                .await?;
            let response = page.recv().await.context("Relay closed")?;
            if response["type"] == "error" {
                bail!(
                    "Signing failed: {} ({})",
                    response["message"].as_str().unwrap_or_default(),
                    response["code"].as_str().unwrap_or_default()
                );
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Erase { yes } => {
            if !yes {
                bail!("Refusing to erase the vault without --yes");
            }
            app.erase().await?;
            println!("Vault erased");
        }
    }

    Ok(())
}

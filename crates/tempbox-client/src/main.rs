use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempbox_client::{ClientError, CredentialStore, InboxClient, PollOutcome, PollingController};
use tempbox_config::{AppConfig, ConfigManager};
use tempbox_core::{is_valid_address, MailMessage, ProviderKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tempbox", version, about = "Disposable inboxes from the command line")]
struct Cli {
    /// Base URL of the tempbox API.
    #[arg(long, env = "TEMPBOX_API", default_value = "http://localhost:3001")]
    api: String,

    /// Directory holding saved inbox credentials.
    #[arg(long, env = "TEMPBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new inbox and remember its credentials.
    Generate {
        #[arg(long)]
        provider: Option<ProviderKind>,
    },
    /// List the messages in an inbox once.
    List { address: String },
    /// Poll an inbox and print messages as they arrive. Press Enter to poll now.
    Watch { address: String },
    /// Print one message.
    Read { address: String, id: String },
    /// Delete a message, or the whole inbox when no id is given.
    Delete { address: String, id: Option<String> },
    /// Show saved inboxes.
    Accounts,
    /// Show provider status reported by the server.
    Info,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Falls back to defaults when no config directory is usable.
fn load_config() -> (AppConfig, Option<PathBuf>) {
    match ConfigManager::new() {
        Ok(manager) => {
            let data_dir = manager.data_dir().to_path_buf();
            let config = manager.load().unwrap_or_else(|err| {
                tracing::warn!("config unreadable ({err}), using defaults");
                AppConfig::default()
            });
            (config, Some(data_dir))
        }
        Err(err) => {
            tracing::warn!("no config directory ({err}), using defaults");
            (AppConfig::default(), None)
        }
    }
}

fn print_message(message: &MailMessage) {
    println!("[{}] {}", message.id, message.received_at.format("%Y-%m-%d %H:%M"));
    match &message.from_name {
        Some(name) => println!("  from:    {name} <{}>", message.from),
        None => println!("  from:    {}", message.from),
    }
    println!("  subject: {}", message.subject);
    if let Some(code) = &message.verification_code {
        println!("  code:    {code}");
    }
    if let Some(service) = message.service.as_ref().and_then(|hint| hint.service.as_deref()) {
        println!("  service: {service}");
    }
}

fn check_address(address: &str) -> anyhow::Result<()> {
    if !is_valid_address(address) {
        bail!("'{address}' is not a valid email address");
    }
    Ok(())
}

async fn watch(
    client: InboxClient,
    store: &CredentialStore,
    config: &AppConfig,
    address: String,
) -> anyhow::Result<()> {
    let credentials = store.get(&address).cloned();
    if credentials.is_none() {
        tracing::warn!(%address, "no saved credentials, the server must still hold this inbox");
    }

    let seen = Arc::new(Mutex::new(HashSet::<String>::new()));
    let controller = PollingController::new(&config.polling);
    controller.watch(address.clone(), move |address| {
        let client = client.clone();
        let credentials = credentials.clone();
        let seen = Arc::clone(&seen);
        async move {
            let inbox = client.list_messages(&address, credentials.as_ref()).await?;
            let fresh: Vec<MailMessage> = {
                let mut seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                inbox
                    .emails
                    .into_iter()
                    .filter(|message| seen.insert(message.id.clone()))
                    .collect()
            };
            for message in &fresh {
                print_message(message);
            }
            Ok::<_, ClientError>(if fresh.is_empty() {
                PollOutcome::Empty
            } else {
                PollOutcome::NewData
            })
        }
    });

    println!("watching {address} (Enter polls now, Ctrl-C quits)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => controller.poll_now(),
                Ok(None) | Err(_) => stdin_open = false,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("wait for ctrl-c")?;
                break;
            }
        }
    }
    controller.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (config, default_data_dir) = load_config();
    let data_dir = cli
        .data_dir
        .or(default_data_dir)
        .context("no data directory available, pass --data-dir")?;
    let mut store = CredentialStore::in_dir(&data_dir).context("open credential store")?;
    let client = InboxClient::new(&cli.api, Duration::from_secs(cli.timeout_secs))
        .context("build api client")?;

    match cli.command {
        Command::Generate { provider } => {
            let inbox = client.generate(provider).await.context("generate inbox")?;
            store
                .save(&inbox.email, inbox.restorable_credentials())
                .context("save credentials")?;
            println!("{}", inbox.email);
            tracing::info!(provider = %inbox.provider, path = %store.path().display(), "credentials saved");
        }
        Command::List { address } => {
            check_address(&address)?;
            let inbox = client
                .list_messages(&address, store.get(&address))
                .await
                .with_context(|| format!("list {address}"))?;
            if inbox.emails.is_empty() {
                println!("no messages");
            }
            for message in &inbox.emails {
                print_message(message);
            }
        }
        Command::Watch { address } => {
            check_address(&address)?;
            watch(client, &store, &config, address).await?;
        }
        Command::Read { address, id } => {
            check_address(&address)?;
            // The list call restores the account on a server that lost it.
            client
                .list_messages(&address, store.get(&address))
                .await
                .with_context(|| format!("open {address}"))?;
            let message = client
                .get_message(&address, &id)
                .await
                .with_context(|| format!("read message {id}"))?;
            print_message(&message);
            println!();
            println!("{}", message.display_text());
        }
        Command::Delete { address, id: Some(id) } => {
            check_address(&address)?;
            client
                .list_messages(&address, store.get(&address))
                .await
                .with_context(|| format!("open {address}"))?;
            client
                .delete_message(&address, &id)
                .await
                .with_context(|| format!("delete message {id}"))?;
            println!("deleted {id}");
        }
        Command::Delete { address, id: None } => {
            check_address(&address)?;
            client
                .delete_account(&address)
                .await
                .with_context(|| format!("delete {address}"))?;
            store.delete(&address).context("forget credentials")?;
            println!("deleted {address}");
        }
        Command::Accounts => {
            if store.all().is_empty() {
                println!("no saved inboxes");
            }
            for (email, saved) in store.all() {
                let provider = saved
                    .credentials
                    .provider
                    .map(|provider| provider.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("{email}  {provider}  saved {}", saved.saved_at.format("%Y-%m-%d %H:%M"));
            }
        }
        Command::Info => {
            let info = client.info().await.context("fetch server info")?;
            println!("server {} (redis: {})", info.version, info.redis_connected);
            for provider in &info.providers {
                let marker = if *provider == info.active_provider { "*" } else { " " };
                println!(
                    "{marker} {provider}  failures {}  usage {}",
                    info.provider_failures.get(provider).copied().unwrap_or(0),
                    info.provider_usage.get(provider).copied().unwrap_or(0),
                );
            }
        }
    }

    Ok(())
}

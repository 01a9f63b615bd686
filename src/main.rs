//! bn - command line client for Binaris functions
//!
//! Deploys the function described by `binaris.yml` in a directory, invokes
//! and removes deployed functions, and prints or follows their logs.
//!
//! ## Configuration
//!
//! Account settings come from environment variables, then `~/.binaris.yml`
//! (written by `bn login`):
//!
//! - `BINARIS_API_KEY`, `BINARIS_ACCOUNT_ID`, `BINARIS_REALM`
//! - `BINARIS_CONF_DIR`: directory holding `.binaris.yml` (default: home)
//! - `BINARIS_DEPLOY_ENDPOINT`, `BINARIS_INVOKE_ENDPOINT`, `BINARIS_LOG_ENDPOINT`
//! - `BINARIS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
//! - `BINARIS_LOG_LEVEL` or `RUST_LOG`: diagnostics filter (default: warn)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use bn_cli::account::{AccountResolver, Credentials, Setting};
use bn_cli::client::LogClient;
use bn_cli::config::{Config, Environment, LOG_LEVEL_VAR};
use bn_cli::deploy::{deploy_from_dir, Deployer};
use bn_cli::descriptor::DescriptorStore;
use bn_cli::error::{Error, Result};
use bn_cli::log_entry::LogCursor;
use bn_cli::logs::{LogSynchronizer, SyncMode};
use bn_cli::storage::{FsStorage, Storage};
use bn_cli::time_expr::parse_time_expression;

#[derive(Debug, Parser)]
#[command(name = "bn", version, about = "Deploy, invoke and tail Binaris functions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Package and upload the function in a directory
    Deploy {
        /// Function directory
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Path to leave out of the upload, relative to the function directory
        #[arg(short, long)]
        exclude: Vec<PathBuf>,
    },

    /// Invoke the deployed function
    Invoke {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Remove the deployed function
    Remove {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Print the function's log
    Logs {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Keep polling for new entries until interrupted
        #[arg(short, long)]
        follow: bool,

        /// Only entries after this time (unix seconds, ISO-8601 or e.g. "2h")
        #[arg(short, long)]
        since: Option<String>,

        /// Maximum number of pages to fetch without --follow
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        pages: u32,
    },

    /// Store account settings in the config file
    Login {
        #[arg(long)]
        api_key: String,

        #[arg(long)]
        account_id: Option<String>,

        #[arg(long)]
        realm: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping...");
            shutdown.cancel();
        }
    });

    if let Err(e) = run(cli.command, Environment::from_process(), &cancel).await {
        debug!(error = ?e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber, writing to stderr.
fn init_tracing() {
    let filter = std::env::var(LOG_LEVEL_VAR)
        .ok()
        .filter(|value| !value.is_empty())
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(command: Command, env: Environment, cancel: &CancellationToken) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(FsStorage);
    let account = AccountResolver::with_default_path(storage.clone(), env.clone());
    let store = DescriptorStore::new(storage);

    match command {
        Command::Deploy { path, exclude } => {
            let (config, credentials) = connect(&account, &env)?;
            let deployer = Deployer::new(&config, credentials)?;
            let url = deploy_from_dir(&store, &deployer, &path, &exclude).await?;
            println!("Deployed function to {}", url);
        }
        Command::Invoke { path, data } => {
            let payload = data
                .map(|data| {
                    serde_json::from_str::<serde_json::Value>(&data).map_err(|e| {
                        Error::InvalidSetting {
                            setting: "data".to_string(),
                            reason: e.to_string(),
                        }
                    })
                })
                .transpose()?;
            let name = function_name(&store, &path)?;
            let (config, credentials) = connect(&account, &env)?;
            let body = Deployer::new(&config, credentials)?
                .invoke(&name, payload.as_ref())
                .await?;
            println!("{}", body);
        }
        Command::Remove { path } => {
            let name = function_name(&store, &path)?;
            let (config, credentials) = connect(&account, &env)?;
            Deployer::new(&config, credentials)?.remove(&name).await?;
            println!("Removed function {}", name);
        }
        Command::Logs {
            path,
            follow,
            since,
            pages,
        } => {
            let cursor = match since {
                Some(expr) => LogCursor::since(parse_time_expression(&expr)?),
                None => LogCursor::latest(),
            };
            let mode = if follow {
                SyncMode::Follow
            } else {
                SyncMode::OneShot { max_polls: pages }
            };
            let name = function_name(&store, &path)?;
            let (config, credentials) = connect(&account, &env)?;
            let client = LogClient::new(&config, &credentials, &name)?;

            let mut sync = LogSynchronizer::new(client, mode, cursor);
            let outcome = sync.run(cancel, |entry| println!("{}", entry)).await?;
            debug!(
                delivered = outcome.delivered,
                polls = outcome.polls,
                stop_reason = ?outcome.stop_reason,
                "Log stream finished"
            );
        }
        Command::Login {
            api_key,
            account_id,
            realm,
        } => {
            account.update(Setting::ApiKey.key(), Some(&api_key))?;
            if let Some(account_id) = account_id {
                account.update(Setting::AccountId.key(), Some(&account_id))?;
            }
            if let Some(realm) = realm {
                account.update(Setting::Realm.key(), Some(&realm))?;
            }
            println!("Saved settings to {}", account.path().display());
        }
    }
    Ok(())
}

/// Name of the single function described in `dir`.
fn function_name(store: &DescriptorStore, dir: &Path) -> Result<String> {
    let descriptor = store.load(&DescriptorStore::path_in(dir))?;
    Ok(descriptor.single_function_name()?.to_string())
}

fn connect(account: &AccountResolver, env: &Environment) -> Result<(Config, Credentials)> {
    let credentials = account.credentials()?;
    let config = Config::from_env(env, &account.get(Setting::Realm)?)?;
    Ok((config, credentials))
}

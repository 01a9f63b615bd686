//! Binaris CLI Library
//!
//! This library provides the pieces behind the `bn` command:
//!
//! - **descriptor**: the `binaris.yml` function descriptor and its validation
//! - **account**: API key / account id / realm resolution and `bn login`
//! - **config**: endpoint and transport settings derived from the environment
//! - **time_expr**: parsing of `--since` style time boundaries
//! - **deploy**: packaging a function directory and talking to the deploy API
//! - **client**: HTTP log source with failure classification
//! - **logs**: the resumable, retrying log synchronizer
//! - **storage**: the file access port shared by descriptor and account code
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bn_cli::account::AccountResolver;
//! use bn_cli::client::LogClient;
//! use bn_cli::config::{Config, Environment};
//! use bn_cli::log_entry::LogCursor;
//! use bn_cli::logs::{LogSynchronizer, SyncMode};
//! use bn_cli::storage::FsStorage;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> bn_cli::Result<()> {
//!     let env = Environment::from_process();
//!     let account = AccountResolver::with_default_path(Arc::new(FsStorage), env.clone());
//!     let credentials = account.credentials()?;
//!     let config = Config::from_env(&env, &account.get(bn_cli::account::Setting::Realm)?)?;
//!
//!     let client = LogClient::new(&config, &credentials, "hello")?;
//!     let mut sync = LogSynchronizer::new(client, SyncMode::one_shot(), LogCursor::latest());
//!     sync.run(&CancellationToken::new(), |entry| println!("{}", entry)).await?;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod account;
pub mod client;
pub mod config;
pub mod deploy;
pub mod descriptor;
pub mod error;
pub mod log_entry;
pub mod logs;
pub mod storage;
pub mod time_expr;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use account::{AccountResolver, Credentials, Setting};
pub use client::{ClientError, LogClient, LogSource};
pub use config::{Config, Environment};
pub use deploy::{package, Artifact, Deployer};
pub use descriptor::{
    DescriptorStore, FunctionConfig, FunctionDescriptor, Runtime, ValidatedFunction,
};
pub use error::{Error, Result};
pub use log_entry::{LogCursor, LogEntry, LogPage};
pub use logs::{LogSynchronizer, StopReason, SyncMode, SyncOutcome, SyncPolicy};
pub use storage::{FsStorage, MemoryStorage, Storage};
pub use time_expr::parse_time_expression;

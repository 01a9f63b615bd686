//! Configuration module for the `bn` client.
//!
//! This module provides the environment snapshot every command works from and
//! the endpoint/transport settings derived from it.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Realm used to derive default endpoint hosts
pub const DEFAULT_REALM: &str = "binaris.com";

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Minimum request timeout
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;

/// Maximum request timeout
const MAX_REQUEST_TIMEOUT_SECS: u64 = 600;

pub const DEPLOY_ENDPOINT_VAR: &str = "BINARIS_DEPLOY_ENDPOINT";
pub const INVOKE_ENDPOINT_VAR: &str = "BINARIS_INVOKE_ENDPOINT";
pub const LOG_ENDPOINT_VAR: &str = "BINARIS_LOG_ENDPOINT";
pub const REQUEST_TIMEOUT_VAR: &str = "BINARIS_REQUEST_TIMEOUT_SECS";
pub const LOG_LEVEL_VAR: &str = "BINARIS_LOG_LEVEL";

/// Immutable view of the process environment.
///
/// Taken once per command invocation; empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Build an environment from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        Self { vars }
    }

    /// Value of `name`, if set and non-empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Endpoint and transport settings for talking to the service.
///
/// All settings can be overridden via environment variables:
/// - `BINARIS_DEPLOY_ENDPOINT`: deploy API base (default: https://api.<realm>)
/// - `BINARIS_INVOKE_ENDPOINT`: invocation base (default: https://run.<realm>)
/// - `BINARIS_LOG_ENDPOINT`: log API base (default: https://logs.<realm>)
/// - `BINARIS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the deploy API
    pub deploy_endpoint: String,

    /// Base URL functions are invoked under
    pub invoke_endpoint: String,

    /// Base URL of the log API
    pub log_endpoint: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,
}

impl Config {
    /// Load endpoint settings from `env`, deriving defaults from `realm`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEnvironment` if an endpoint is not an http(s)
    /// URL or the request timeout is not a number within limits.
    pub fn from_env(env: &Environment, realm: &str) -> Result<Self> {
        let deploy_endpoint = Self::parse_endpoint(env, DEPLOY_ENDPOINT_VAR, "api", realm)?;
        let invoke_endpoint = Self::parse_endpoint(env, INVOKE_ENDPOINT_VAR, "run", realm)?;
        let log_endpoint = Self::parse_endpoint(env, LOG_ENDPOINT_VAR, "logs", realm)?;
        let request_timeout = Duration::from_secs(Self::parse_request_timeout(env)?);

        Ok(Self {
            deploy_endpoint,
            invoke_endpoint,
            log_endpoint,
            request_timeout,
        })
    }

    /// Parse an endpoint override, or derive `https://<service>.<realm>`.
    fn parse_endpoint(env: &Environment, var: &str, service: &str, realm: &str) -> Result<String> {
        let endpoint = match env.get(var) {
            Some(value) => value.to_string(),
            None => format!("https://{}.{}", service, realm),
        };

        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::InvalidEnvironment {
                var: var.to_string(),
                reason: format!("'{}' is not an http(s) URL", endpoint),
            });
        }

        Ok(endpoint.trim_end_matches('/').to_string())
    }

    /// Parse request timeout from environment variable with validation.
    fn parse_request_timeout(env: &Environment) -> Result<u64> {
        let Some(value) = env.get(REQUEST_TIMEOUT_VAR) else {
            return Ok(DEFAULT_REQUEST_TIMEOUT_SECS);
        };

        let secs: u64 = value.parse().map_err(|_| Error::InvalidEnvironment {
            var: REQUEST_TIMEOUT_VAR.to_string(),
            reason: format!("'{}' is not a valid number", value),
        })?;

        if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS).contains(&secs) {
            return Err(Error::InvalidEnvironment {
                var: REQUEST_TIMEOUT_VAR.to_string(),
                reason: format!(
                    "timeout {} must be between {}s and {}s",
                    secs, MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS
                ),
            });
        }

        Ok(secs)
    }
}

impl Default for Config {
    /// Endpoints for the default realm.
    fn default() -> Self {
        Self {
            deploy_endpoint: format!("https://api.{}", DEFAULT_REALM),
            invoke_endpoint: format!("https://run.{}", DEFAULT_REALM),
            log_endpoint: format!("https://logs.{}", DEFAULT_REALM),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

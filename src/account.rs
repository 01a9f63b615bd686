//! Account configuration resolver.
//!
//! Settings resolve from the environment first, then from the persisted user
//! config file (`~/.binaris.yml`, or `$BINARIS_CONF_DIR/.binaris.yml`), then
//! from an explicit default. Resolved values must be printable ASCII.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::config::{Environment, DEFAULT_REALM};
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Overrides the directory holding the account config file.
pub const CONF_DIR_VAR: &str = "BINARIS_CONF_DIR";

/// File name of the persisted account config.
pub const CONF_FILE_NAME: &str = ".binaris.yml";

static PRINTABLE_ASCII: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\x20-\x7E]+$").expect("printable ASCII pattern is valid")
});

/// A named account setting and where it can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    ApiKey,
    AccountId,
    Realm,
}

impl Setting {
    /// Key used in the persisted config file.
    pub fn key(self) -> &'static str {
        match self {
            Setting::ApiKey => "apiKey",
            Setting::AccountId => "accountId",
            Setting::Realm => "realm",
        }
    }

    /// Environment variable overriding the persisted value.
    pub fn env_var(self) -> &'static str {
        match self {
            Setting::ApiKey => "BINARIS_API_KEY",
            Setting::AccountId => "BINARIS_ACCOUNT_ID",
            Setting::Realm => "BINARIS_REALM",
        }
    }
}

/// Credentials attached to every remote call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub account_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Resolves account settings for a single command invocation.
#[derive(Clone)]
pub struct AccountResolver {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    env: Environment,
}

impl fmt::Debug for AccountResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountResolver")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AccountResolver {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<PathBuf>, env: Environment) -> Self {
        Self {
            storage,
            path: path.into(),
            env,
        }
    }

    /// Resolver reading the config file from its well-known location.
    pub fn with_default_path(storage: Arc<dyn Storage>, env: Environment) -> Self {
        let path = default_config_path(&env);
        Self::new(storage, path, env)
    }

    /// Location of the persisted config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `key`: environment variable, then persisted file, then `default`.
    ///
    /// # Errors
    ///
    /// - `Error::Unconfigured` if no source provides a value
    /// - `Error::InvalidSetting` if the value is not printable ASCII
    pub fn resolve(&self, key: &str, env_var: &str, default: Option<&str>) -> Result<String> {
        let value = if let Some(value) = self.env.get(env_var) {
            debug!(setting = key, source = "environment", "Resolved setting");
            value.to_string()
        } else if let Some(value) = self.load_persisted()?.remove(key) {
            debug!(setting = key, source = "config file", "Resolved setting");
            value
        } else if let Some(value) = default {
            debug!(setting = key, source = "default", "Resolved setting");
            value.to_string()
        } else {
            return Err(Error::Unconfigured {
                setting: key.to_string(),
                env_var: env_var.to_string(),
            });
        };

        validate_value(key, &value)?;
        Ok(value)
    }

    /// Resolve a well-known setting.
    pub fn get(&self, setting: Setting) -> Result<String> {
        let default = match setting {
            Setting::Realm => Some(DEFAULT_REALM),
            Setting::ApiKey | Setting::AccountId => None,
        };
        self.resolve(setting.key(), setting.env_var(), default)
    }

    /// API key and account id, both required.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            api_key: self.get(Setting::ApiKey)?,
            account_id: self.get(Setting::AccountId)?,
        })
    }

    /// Set (`Some`) or delete (`None`) `key` in the persisted file.
    ///
    /// A missing or unreadable file is treated as empty. The whole file is
    /// rewritten; concurrent updates are last-writer-wins.
    pub fn update(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut settings = match self.load_persisted() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable account config"
                );
                BTreeMap::new()
            }
        };

        match value {
            Some(value) => {
                validate_value(key, value)?;
                settings.insert(key.to_string(), value.to_string());
            }
            None => {
                settings.remove(key);
            }
        }

        let yaml = serde_yaml::to_string(&settings).map_err(|e| Error::InvalidSetting {
            setting: key.to_string(),
            reason: e.to_string(),
        })?;
        self.storage
            .write(&self.path, yaml.as_bytes())
            .map_err(|e| Error::storage(&self.path, e))?;

        info!(
            path = %self.path.display(),
            setting = key,
            deleted = value.is_none(),
            "Account config updated"
        );
        Ok(())
    }

    /// Persisted settings; a missing file yields an empty map.
    fn load_persisted(&self) -> Result<BTreeMap<String, String>> {
        let bytes = match self.storage.read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(Error::storage(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }

        let mapping: Mapping =
            serde_yaml::from_slice(&bytes).map_err(|e| Error::InvalidSetting {
                setting: self.path.display().to_string(),
                reason: format!("account config is not a mapping: {}", e),
            })?;

        Ok(mapping
            .into_iter()
            .filter_map(|(k, v)| Some((scalar_to_string(k)?, scalar_to_string(v)?)))
            .collect())
    }
}

/// `$BINARIS_CONF_DIR/.binaris.yml`, else `~/.binaris.yml`.
pub fn default_config_path(env: &Environment) -> PathBuf {
    match env.get(CONF_DIR_VAR) {
        Some(dir) => PathBuf::from(dir).join(CONF_FILE_NAME),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONF_FILE_NAME),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if PRINTABLE_ASCII.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidSetting {
            setting: key.to_string(),
            reason: "value must be non-empty printable ASCII".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const CONF: &str = "/home/user/.binaris.yml";

    fn resolver(storage: Arc<MemoryStorage>, env: &[(&str, &str)]) -> AccountResolver {
        AccountResolver::new(storage, CONF, Environment::from_pairs(env.iter().copied()))
    }

    #[test]
    fn test_env_wins_over_file() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(CONF, "apiKey: xyz\n");
        let resolver = resolver(storage, &[("BINARIS_API_KEY", "abc")]);

        assert_eq!(resolver.resolve("apiKey", "BINARIS_API_KEY", None).unwrap(), "abc");
    }

    #[test]
    fn test_file_used_when_env_unset() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(CONF, "apiKey: xyz\naccountId: 12345\n");
        let resolver = resolver(storage, &[]);

        assert_eq!(resolver.resolve("apiKey", "BINARIS_API_KEY", None).unwrap(), "xyz");
        // Numeric YAML scalars come back as strings
        assert_eq!(resolver.get(Setting::AccountId).unwrap(), "12345");
    }

    #[test]
    fn test_default_used_last() {
        let resolver = resolver(Arc::new(MemoryStorage::new()), &[]);
        assert_eq!(resolver.get(Setting::Realm).unwrap(), DEFAULT_REALM);
        assert_eq!(
            resolver.resolve("realm", "BINARIS_REALM", Some("example.org")).unwrap(),
            "example.org"
        );
    }

    #[test]
    fn test_unconfigured() {
        let resolver = resolver(Arc::new(MemoryStorage::new()), &[]);
        let err = resolver.resolve("apiKey", "BINARIS_API_KEY", None).unwrap_err();
        assert!(matches!(err, Error::Unconfigured { ref setting, .. } if setting == "apiKey"));
        assert!(err.to_string().contains("bn login"));
    }

    #[test]
    fn test_non_ascii_value_rejected() {
        let resolver = resolver(Arc::new(MemoryStorage::new()), &[("BINARIS_API_KEY", "kéy")]);
        let err = resolver.get(Setting::ApiKey).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { .. }));

        let resolver = resolver_with_file("apiKey: \"a\\tb\"\n");
        assert!(matches!(resolver.get(Setting::ApiKey), Err(Error::InvalidSetting { .. })));
    }

    fn resolver_with_file(contents: &str) -> AccountResolver {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(CONF, contents);
        resolver(storage, &[])
    }

    #[test]
    fn test_credentials() {
        let resolver = resolver_with_file("apiKey: key\naccountId: '42'\n");
        let credentials = resolver.credentials().unwrap();
        assert_eq!(credentials.api_key, "key");
        assert_eq!(credentials.account_id, "42");
        assert!(format!("{:?}", credentials).contains("<redacted>"));
    }

    #[test]
    fn test_update_sets_and_deletes() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(CONF, "apiKey: old\nrealm: example.org\n");
        let resolver = resolver(storage.clone(), &[]);

        resolver.update("apiKey", Some("new")).unwrap();
        resolver.update("realm", None).unwrap();

        assert_eq!(resolver.get(Setting::ApiKey).unwrap(), "new");
        assert_eq!(resolver.get(Setting::Realm).unwrap(), DEFAULT_REALM);
        let written = storage.contents(Path::new(CONF)).unwrap();
        assert!(!written.contains("realm"));
        assert!(!written.contains("null"));
    }

    #[test]
    fn test_update_tolerates_garbage_file() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(CONF, "- not\n- a mapping\n");
        let resolver = resolver(storage, &[]);

        resolver.update("accountId", Some("7")).unwrap();
        assert_eq!(resolver.get(Setting::AccountId).unwrap(), "7");
    }

    #[test]
    fn test_update_rejects_invalid_value() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(storage.clone(), &[]);

        assert!(resolver.update("apiKey", Some("bad\nkey")).is_err());
        assert!(storage.contents(Path::new(CONF)).is_none());
    }

    #[test]
    fn test_default_config_path_override() {
        let env = Environment::from_pairs([(CONF_DIR_VAR, "/tmp/conf")]);
        assert_eq!(default_config_path(&env), PathBuf::from("/tmp/conf/.binaris.yml"));
    }
}

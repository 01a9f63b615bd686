//! Descriptor store for `binaris.yml`.
//!
//! A descriptor declares the functions of a project under a top-level
//! `functions` mapping. Loading only checks structure; field-level checks live
//! in [`DescriptorStore::validate`] so a half-written descriptor can still be
//! inspected and repaired.
//!
//! ```yaml
//! functions:
//!   hello:
//!     file: function.js
//!     entrypoint: handler
//!     runtime: node8
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Descriptor file name inside a function directory.
pub const DESCRIPTOR_FILE: &str = "binaris.yml";

const FUNCTIONS_KEY: &str = "functions";
const FILE_FIELD: &str = "file";
const ENTRYPOINT_FIELD: &str = "entrypoint";
const RUNTIME_FIELD: &str = "runtime";
const ENV_FIELD: &str = "env";

/// Runtimes the service can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Node8,
    Node10,
    Python2,
    Python3,
    Pypy2,
}

impl Runtime {
    pub const ALL: [Runtime; 5] = [
        Runtime::Node8,
        Runtime::Node10,
        Runtime::Python2,
        Runtime::Python3,
        Runtime::Pypy2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Node8 => "node8",
            Runtime::Node10 => "node10",
            Runtime::Python2 => "python2",
            Runtime::Python3 => "python3",
            Runtime::Pypy2 => "pypy2",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Runtime::ALL
            .into_iter()
            .find(|runtime| runtime.as_str() == s)
            .ok_or(())
    }
}

/// Configuration of a single function, kept as the raw YAML mapping.
///
/// Fields are not checked until [`DescriptorStore::validate`]; unknown fields
/// survive a load/save round trip.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct FunctionConfig(Mapping);

impl FunctionConfig {
    pub fn new(file: &str, entrypoint: &str, runtime: Runtime) -> Self {
        let mut config = Self::default();
        config.set(FILE_FIELD, file);
        config.set(ENTRYPOINT_FIELD, entrypoint);
        config.set(RUNTIME_FIELD, runtime.as_str());
        config
    }

    /// Set a string field, replacing any previous value.
    pub fn set(&mut self, field: &str, value: &str) {
        self.0
            .insert(Value::String(field.to_string()), Value::String(value.to_string()));
    }

    /// Set one entry of the function's `env` mapping.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let env = self
            .0
            .entry(Value::String(ENV_FIELD.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !env.is_mapping() {
            *env = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(env) = env {
            env.insert(Value::String(key.to_string()), Value::String(value.to_string()));
        }
    }

    /// Remove a field, returning whether it was present.
    pub fn unset(&mut self, field: &str) -> bool {
        self.0.remove(field).is_some()
    }

    /// String value of `field`; `None` if absent or not a string.
    pub fn field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn file(&self) -> Option<&str> {
        self.field(FILE_FIELD)
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.field(ENTRYPOINT_FIELD)
    }

    pub fn runtime(&self) -> Option<&str> {
        self.field(RUNTIME_FIELD)
    }
}

/// In-memory form of `binaris.yml`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionDescriptor {
    functions: BTreeMap<String, FunctionConfig>,
    /// Top-level keys other than `functions`, preserved verbatim.
    extra: Mapping,
}

impl FunctionDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn functions(&self) -> &BTreeMap<String, FunctionConfig> {
        &self.functions
    }

    /// Name of the only function; fails unless exactly one is declared.
    pub fn single_function_name(&self) -> Result<&str> {
        match self.functions.len() {
            1 => Ok(self.functions.keys().next().map(String::as_str).unwrap_or_default()),
            count => Err(Error::UnsupportedArity { count }),
        }
    }

    pub fn get(&self, name: &str) -> Result<&FunctionConfig> {
        self.functions.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })
    }

    /// Declare `name` with a copy of `config`.
    pub fn add(&mut self, name: &str, config: &FunctionConfig) -> Result<()> {
        if self.functions.contains_key(name) {
            return Err(Error::AlreadyExists {
                name: name.to_string(),
            });
        }
        self.functions.insert(name.to_string(), config.clone());
        Ok(())
    }

    /// Remove `name`, returning its configuration.
    pub fn remove(&mut self, name: &str) -> Result<FunctionConfig> {
        self.functions.remove(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })
    }

    fn from_yaml(path: &Path, bytes: &[u8]) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason,
        };

        let value: Value = serde_yaml::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        let Value::Mapping(mut root) = value else {
            return Err(malformed("top level is not a mapping".to_string()));
        };
        let functions = root
            .remove(FUNCTIONS_KEY)
            .ok_or_else(|| malformed(format!("missing top-level '{}' key", FUNCTIONS_KEY)))?;
        if !functions.is_mapping() {
            return Err(malformed(format!("'{}' is not a mapping", FUNCTIONS_KEY)));
        }
        let functions: BTreeMap<String, FunctionConfig> = serde_yaml::from_value(functions)
            .map_err(|e| malformed(format!("invalid function entry: {}", e)))?;

        Ok(Self {
            functions,
            extra: root,
        })
    }

    fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        let mut root = Mapping::new();
        root.insert(
            Value::String(FUNCTIONS_KEY.to_string()),
            serde_yaml::to_value(&self.functions)?,
        );
        for (key, value) in &self.extra {
            root.insert(key.clone(), value.clone());
        }
        serde_yaml::to_string(&root)
    }
}

/// A function whose descriptor entry passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFunction {
    pub name: String,
    pub file: String,
    pub entrypoint: String,
    pub runtime: Runtime,
    pub env: BTreeMap<String, String>,
}

/// Reads, writes and validates descriptors through a [`Storage`] port.
#[derive(Clone)]
pub struct DescriptorStore {
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorStore").finish_non_exhaustive()
    }
}

impl DescriptorStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Path of the descriptor inside `function_dir`.
    pub fn path_in(function_dir: &Path) -> PathBuf {
        function_dir.join(DESCRIPTOR_FILE)
    }

    /// Read and parse the descriptor at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedDescriptor` if the file is missing or
    /// unparsable, or lacks a top-level `functions` mapping.
    pub fn load(&self, path: &Path) -> Result<FunctionDescriptor> {
        let bytes = self.storage.read(path).map_err(|e| Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason: format!("cannot read file: {}", e),
        })?;
        let descriptor = FunctionDescriptor::from_yaml(path, &bytes)?;

        debug!(
            path = %path.display(),
            functions = descriptor.functions.len(),
            "Loaded descriptor"
        );
        Ok(descriptor)
    }

    /// Serialize and write `descriptor` to `path`. Last writer wins.
    pub fn save(&self, path: &Path, descriptor: &FunctionDescriptor) -> Result<()> {
        let yaml = descriptor.to_yaml().map_err(|e| Error::MalformedDescriptor {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.storage
            .write(path, yaml.as_bytes())
            .map_err(|e| Error::storage(path, e))?;

        debug!(path = %path.display(), "Saved descriptor");
        Ok(())
    }

    /// Check the fields of function `name` and that its code file is readable
    /// relative to `base_dir`.
    pub fn validate(
        &self,
        name: &str,
        config: &FunctionConfig,
        base_dir: &Path,
    ) -> Result<ValidatedFunction> {
        let required = |field: &str| {
            config
                .field(field)
                .map(str::to_string)
                .ok_or_else(|| Error::MissingField {
                    function: name.to_string(),
                    field: field.to_string(),
                })
        };

        let file = required(FILE_FIELD)?;
        let entrypoint = required(ENTRYPOINT_FIELD)?;
        let runtime_name = required(RUNTIME_FIELD)?;

        let runtime = runtime_name
            .parse::<Runtime>()
            .map_err(|()| Error::UnsupportedRuntime {
                function: name.to_string(),
                runtime: runtime_name.clone(),
                supported: Runtime::ALL.map(Runtime::as_str).join(", "),
            })?;

        let env = validate_env(name, config.0.get(ENV_FIELD))?;

        let code_path = base_dir.join(&file);
        self.storage
            .check_readable(&code_path)
            .map_err(|source| Error::CodeFileUnreadable {
                path: code_path,
                source,
            })?;

        Ok(ValidatedFunction {
            name: name.to_string(),
            file,
            entrypoint,
            runtime,
            env,
        })
    }
}

/// Scalars are accepted as env values; anything else names `env.<key>`.
fn validate_env(name: &str, env: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let missing = |field: String| Error::MissingField {
        function: name.to_string(),
        field,
    };

    let env = match env {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Mapping(env)) => env,
        Some(_) => return Err(missing(ENV_FIELD.to_string())),
    };

    env.iter()
        .map(|(key, value)| {
            let key = key
                .as_str()
                .ok_or_else(|| missing(format!("{}.<non-string key>", ENV_FIELD)))?;
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(missing(format!("{}.{}", ENV_FIELD, key))),
            };
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsStorage, MemoryStorage};

    const DESCRIPTOR: &str = "\
functions:
  hello:
    file: function.js
    entrypoint: handler
    runtime: node8
";

    fn store_with(files: &[(&str, &str)]) -> (Arc<MemoryStorage>, DescriptorStore) {
        let storage = Arc::new(MemoryStorage::new());
        for (path, contents) in files {
            storage.insert(*path, *contents);
        }
        (storage.clone(), DescriptorStore::new(storage))
    }

    fn malformed(contents: &str) -> bool {
        let (_, store) = store_with(&[("/fn/binaris.yml", contents)]);
        matches!(
            store.load(Path::new("/fn/binaris.yml")),
            Err(Error::MalformedDescriptor { .. })
        )
    }

    #[test]
    fn test_load() {
        let (_, store) = store_with(&[("/fn/binaris.yml", DESCRIPTOR)]);
        let descriptor = store.load(Path::new("/fn/binaris.yml")).unwrap();

        assert_eq!(descriptor.single_function_name().unwrap(), "hello");
        let config = descriptor.get("hello").unwrap();
        assert_eq!(config.file(), Some("function.js"));
        assert_eq!(config.entrypoint(), Some("handler"));
        assert_eq!(config.runtime(), Some("node8"));
    }

    #[test]
    fn test_load_malformed() {
        let (_, store) = store_with(&[]);
        assert!(matches!(
            store.load(Path::new("/missing/binaris.yml")),
            Err(Error::MalformedDescriptor { .. })
        ));

        assert!(malformed("functions: [unclosed"));
        assert!(malformed("- just\n- a list\n"));
        assert!(malformed("name: hello\n"));
        assert!(malformed("functions: 3\n"));
        assert!(malformed("functions:\n  - hello\n"));
        assert!(malformed("functions:\n  hello: not-a-mapping\n"));
        assert!(!malformed("functions: {}\n"));
    }

    #[test]
    fn test_single_function_name_arity() {
        let mut descriptor = FunctionDescriptor::new();
        assert!(matches!(
            descriptor.single_function_name(),
            Err(Error::UnsupportedArity { count: 0 })
        ));

        let config = FunctionConfig::new("f.js", "handler", Runtime::Node8);
        descriptor.add("one", &config).unwrap();
        assert_eq!(descriptor.single_function_name().unwrap(), "one");

        descriptor.add("two", &config).unwrap();
        assert!(matches!(
            descriptor.single_function_name(),
            Err(Error::UnsupportedArity { count: 2 })
        ));
    }

    #[test]
    fn test_add_remove_pair() {
        let (_, store) = store_with(&[("/fn/binaris.yml", DESCRIPTOR)]);
        let original = store.load(Path::new("/fn/binaris.yml")).unwrap();
        let mut descriptor = original.clone();
        let config = FunctionConfig::new("other.py", "handler", Runtime::Python3);

        descriptor.add("other", &config).unwrap();
        assert!(matches!(
            descriptor.add("other", &config),
            Err(Error::AlreadyExists { ref name }) if name == "other"
        ));

        assert_eq!(descriptor.remove("other").unwrap(), config);
        assert!(matches!(
            descriptor.remove("other"),
            Err(Error::NotFound { ref name }) if name == "other"
        ));
        assert_eq!(descriptor, original);
    }

    #[test]
    fn test_add_copies_config() {
        let mut template = FunctionConfig::new("f.js", "handler", Runtime::Node8);
        let mut descriptor = FunctionDescriptor::new();
        descriptor.add("renamed", &template).unwrap();

        template.set("file", "changed.js");
        assert_eq!(descriptor.get("renamed").unwrap().file(), Some("f.js"));
    }

    #[test]
    fn test_get_missing() {
        let descriptor = FunctionDescriptor::new();
        assert!(matches!(descriptor.get("nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_save_load_round_trip() {
        let source = "\
functions:
  hello:
    file: function.js
    entrypoint: handler
    runtime: node8
    memory: 128
    env:
      GREETING: hi
owner: team-a
";
        let (storage, store) = store_with(&[("/fn/binaris.yml", source)]);
        let descriptor = store.load(Path::new("/fn/binaris.yml")).unwrap();

        store.save(Path::new("/out/binaris.yml"), &descriptor).unwrap();
        let reloaded = store.load(Path::new("/out/binaris.yml")).unwrap();
        assert_eq!(reloaded, descriptor);

        let written = storage.contents(Path::new("/out/binaris.yml")).unwrap();
        assert!(written.contains("owner: team-a"));
        assert!(written.contains("memory: 128"));
    }

    #[test]
    fn test_save_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = DescriptorStore::path_in(dir.path());
        let store = DescriptorStore::new(Arc::new(FsStorage));

        let mut descriptor = FunctionDescriptor::new();
        let mut config = FunctionConfig::new("main.py", "handler", Runtime::Python2);
        config.set_env("LEVEL", "debug");
        descriptor.add("worker", &config).unwrap();

        store.save(&path, &descriptor).unwrap();
        assert_eq!(store.load(&path).unwrap(), descriptor);
    }

    #[test]
    fn test_validate() {
        let (_, store) = store_with(&[("/fn/binaris.yml", DESCRIPTOR), ("/fn/function.js", "")]);
        let descriptor = store.load(Path::new("/fn/binaris.yml")).unwrap();

        let validated = store
            .validate("hello", descriptor.get("hello").unwrap(), Path::new("/fn"))
            .unwrap();
        assert_eq!(validated.file, "function.js");
        assert_eq!(validated.entrypoint, "handler");
        assert_eq!(validated.runtime, Runtime::Node8);
        assert!(validated.env.is_empty());
    }

    #[test]
    fn test_validate_missing_field() {
        let (_, store) = store_with(&[("/fn/f.js", "")]);
        let mut config = FunctionConfig::new("f.js", "handler", Runtime::Node8);
        config.unset("entrypoint");

        match store.validate("hello", &config, Path::new("/fn")) {
            Err(Error::MissingField { function, field }) => {
                assert_eq!(function, "hello");
                assert_eq!(field, "entrypoint");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let config: FunctionConfig =
            serde_yaml::from_str("file: f.js\nentrypoint: handler\nruntime: 8\n").unwrap();
        assert!(matches!(
            store.validate("hello", &config, Path::new("/fn")),
            Err(Error::MissingField { ref field, .. }) if field == "runtime"
        ));
    }

    #[test]
    fn test_validate_runtime() {
        let (_, store) = store_with(&[("/fn/f.js", "")]);
        let mut config = FunctionConfig::new("f.js", "handler", Runtime::Node8);
        config.set("runtime", "cobol");

        let err = store.validate("hello", &config, Path::new("/fn")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRuntime { .. }));
        assert!(err.to_string().contains("cobol"));
        assert!(err.to_string().contains("python3"));
    }

    #[test]
    fn test_validate_code_file_unreadable() {
        let (_, store) = store_with(&[]);
        let config = FunctionConfig::new("missing.js", "handler", Runtime::Node10);

        match store.validate("hello", &config, Path::new("/fn")) {
            Err(Error::CodeFileUnreadable { path, .. }) => {
                assert_eq!(path, PathBuf::from("/fn/missing.js"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_env() {
        let (_, store) = store_with(&[("/fn/f.js", "")]);
        let config: FunctionConfig = serde_yaml::from_str(
            "file: f.js\nentrypoint: h\nruntime: pypy2\nenv:\n  PORT: 8080\n  NAME: x\n",
        )
        .unwrap();
        let validated = store.validate("hello", &config, Path::new("/fn")).unwrap();
        assert_eq!(validated.env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(validated.env.get("NAME").map(String::as_str), Some("x"));

        let config: FunctionConfig = serde_yaml::from_str(
            "file: f.js\nentrypoint: h\nruntime: pypy2\nenv:\n  LIST: [1, 2]\n",
        )
        .unwrap();
        assert!(matches!(
            store.validate("hello", &config, Path::new("/fn")),
            Err(Error::MissingField { ref field, .. }) if field == "env.LIST"
        ));
    }

    #[test]
    fn test_runtime_parse() {
        assert_eq!("node10".parse::<Runtime>(), Ok(Runtime::Node10));
        assert!("node12".parse::<Runtime>().is_err());
        assert_eq!(Runtime::Python3.to_string(), "python3");
    }
}

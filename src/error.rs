//! Error taxonomy shared by every operation in the crate.
//!
//! Validation errors describe a local condition the user can fix and are never
//! retried. Network-class errors are retried only inside the log synchronizer's
//! bounded backoff.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a command can surface to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor file is missing, unparsable or lacks a `functions` mapping
    #[error("malformed descriptor {}: {reason}", path.display())]
    MalformedDescriptor { path: PathBuf, reason: String },

    /// The descriptor does not contain exactly one function
    #[error("descriptor must define exactly one function, found {count}")]
    UnsupportedArity { count: usize },

    /// No function with the given name exists in the descriptor
    #[error("function '{name}' not found in descriptor")]
    NotFound { name: String },

    /// A function with the given name is already declared
    #[error("function '{name}' already exists in descriptor")]
    AlreadyExists { name: String },

    /// A required function field is absent or not a string
    #[error("function '{function}' is missing required string field '{field}'")]
    MissingField { function: String, field: String },

    /// The runtime field names a runtime the service does not offer
    #[error("function '{function}' uses unsupported runtime '{runtime}' (supported: {supported})")]
    UnsupportedRuntime {
        function: String,
        runtime: String,
        supported: String,
    },

    /// The code file referenced by a function cannot be opened
    #[error("cannot read code file {}: {source}", path.display())]
    CodeFileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An account setting has no value in env, config file or defaults
    #[error("{setting} is not configured; run `bn login` or set {env_var}")]
    Unconfigured { setting: String, env_var: String },

    /// An account setting value failed validation
    #[error("invalid value for {setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },

    /// An environment variable holds an unusable value
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvironment { var: String, reason: String },

    /// A `--since` style time boundary could not be understood
    #[error("invalid time expression '{input}': {reason}")]
    InvalidTimeExpression { input: String, reason: String },

    /// Reading or writing a local file failed
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Building the upload archive failed
    #[error("failed to package function: {reason}")]
    Packaging { reason: String },

    /// The deploy endpoint answered with a non-success status
    #[error("upload failed with status {status}: {body}")]
    UploadFailed { status: u16, body: String },

    /// The deploy endpoint rejected the function with a structured error code
    #[error("deploy rejected ({code}): {message}")]
    DeployRejected { code: String, message: String },

    /// The function invocation returned a non-success status
    #[error("invocation failed with status {status}: {body}")]
    InvokeFailed { status: u16, body: String },

    /// No connection could be made to the remote service
    #[error("no backend reachable at {url}: {reason}")]
    NoBackendReachable { url: String, reason: String },

    /// The log endpoint kept failing transiently until the attempt ceiling
    #[error("log fetch failed after {attempts} attempts: {last_error}")]
    LogFetchExhausted { attempts: u32, last_error: String },

    /// The log endpoint answered with an error status
    #[error("log fetch rejected with status {status}: {message}")]
    LogFetchRejected { status: u16, message: String },

    /// A success response carried a body that could not be decoded
    #[error("malformed response from service: {reason}")]
    MalformedResponse { reason: String },
}

impl Error {
    /// Whether the log synchronizer may retry after this error.
    ///
    /// Connection failures, 5xx responses and 429 are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NoBackendReachable { .. } => true,
            Error::LogFetchRejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether this error describes a locally fixable condition.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MalformedDescriptor { .. }
                | Error::UnsupportedArity { .. }
                | Error::NotFound { .. }
                | Error::AlreadyExists { .. }
                | Error::MissingField { .. }
                | Error::UnsupportedRuntime { .. }
                | Error::CodeFileUnreadable { .. }
                | Error::InvalidSetting { .. }
                | Error::InvalidEnvironment { .. }
                | Error::InvalidTimeExpression { .. }
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

//! Packaging and deployment of a function.
//!
//! [`package`] builds a gzip tarball of a function directory; [`Deployer`]
//! uploads it together with the descriptor fields and manages the deployed
//! function (remove, invoke).

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use tempfile::TempDir;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::account::Credentials;
use crate::client::{build_http_client, API_KEY_HEADER, REQUEST_ID_HEADER};
use crate::config::Config;
use crate::descriptor::{DescriptorStore, ValidatedFunction, DESCRIPTOR_FILE};
use crate::error::{Error, Result};

/// Paths never shipped to the service, relative to the function directory.
pub const ALWAYS_EXCLUDED: [&str; 3] = [".git", ".binaris", DESCRIPTOR_FILE];

const ARCHIVE_NAME: &str = "function.tar.gz";

/// Messages for error codes the deploy API may return.
const ERROR_MESSAGES: &[(&str, &str)] = &[
    ("ERR_NO_BACKEND", "no backend is available to run the function, try again later"),
    ("ERR_INVALID_RUNTIME", "the service does not support the requested runtime"),
    ("ERR_INVALID_ENTRYPOINT", "the entrypoint was not found in the uploaded code"),
    ("ERR_CODE_TOO_LARGE", "the code archive exceeds the service size limit"),
    ("ERR_INVALID_NAME", "the function name is not valid"),
    ("ERR_BAD_API_KEY", "the API key was rejected, run `bn login` again"),
    ("ERR_NOT_FOUND", "the function does not exist"),
    ("ERR_QUOTA_EXCEEDED", "the account has reached its function quota"),
];

/// Human-readable description of a deploy error code, or the code itself.
pub fn describe_error_code(code: &str) -> String {
    ERROR_MESSAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, message)| message.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// A packaged function ready for upload.
///
/// The archive lives in a temporary directory removed when this is dropped.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    size: u64,
    _dir: TempDir,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

fn packaging(reason: impl std::fmt::Display) -> Error {
    Error::Packaging {
        reason: reason.to_string(),
    }
}

/// Strip `./` components so `./node_modules` and `node_modules` match alike.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Archive `source_dir`, skipping [`ALWAYS_EXCLUDED`] and `exclude`.
///
/// Exclusions are relative to `source_dir`; an excluded directory drops its
/// whole subtree.
pub fn package(source_dir: &Path, exclude: &[PathBuf]) -> Result<Artifact> {
    let excluded: Vec<PathBuf> = ALWAYS_EXCLUDED
        .iter()
        .map(PathBuf::from)
        .chain(exclude.iter().map(|p| normalize(p)))
        .collect();
    let is_excluded = |path: &Path| -> bool {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        excluded.iter().any(|ex| relative.starts_with(ex))
    };

    let dir = tempfile::tempdir().map_err(packaging)?;
    let path = dir.path().join(ARCHIVE_NAME);
    let file = File::create(&path).map_err(packaging)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut files = 0usize;
    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.path()));

    for entry in walker {
        let entry = entry.map_err(packaging)?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(packaging)?
            .to_path_buf();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            builder.append_dir(&relative, entry.path()).map_err(packaging)?;
        } else if file_type.is_file() {
            builder
                .append_path_with_name(entry.path(), &relative)
                .map_err(packaging)?;
            files += 1;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(packaging)?;
    let size = fs::metadata(&path).map_err(packaging)?.len();

    info!(
        source = %source_dir.display(),
        files = files,
        bytes = size,
        "Packaged function"
    );
    Ok(Artifact {
        path,
        size,
        _dir: dir,
    })
}

/// `<invokeBase>/v2/run/<accountId>/<name>`
pub fn invoke_url(invoke_endpoint: &str, account_id: &str, function_name: &str) -> String {
    format!("{}/v2/run/{}/{}", invoke_endpoint, account_id, function_name)
}

/// Structured error body of the deploy API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

/// Map a deploy API response to the error taxonomy.
///
/// A structured `errorCode` wins over the status code.
pub fn interpret_deploy_response(status: StatusCode, body: &str) -> Result<()> {
    let code = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_code);
    if let Some(code) = code {
        return Err(Error::DeployRejected {
            message: describe_error_code(&code),
            code,
        });
    }
    if !status.is_success() {
        return Err(Error::UploadFailed {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(())
}

fn unreachable(url: &str, err: reqwest::Error) -> Error {
    Error::NoBackendReachable {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// Client for the deploy and invoke endpoints.
pub struct Deployer {
    client: Client,
    deploy_endpoint: String,
    invoke_endpoint: String,
    credentials: Credentials,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("deploy_endpoint", &self.deploy_endpoint)
            .field("invoke_endpoint", &self.invoke_endpoint)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Deployer {
    pub fn new(config: &Config, credentials: Credentials) -> Result<Self> {
        Self::with_settings(
            &config.deploy_endpoint,
            &config.invoke_endpoint,
            config.request_timeout,
            credentials,
        )
    }

    pub fn with_settings(
        deploy_endpoint: &str,
        invoke_endpoint: &str,
        timeout: Duration,
        credentials: Credentials,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            deploy_endpoint: deploy_endpoint.trim_end_matches('/').to_string(),
            invoke_endpoint: invoke_endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// `<deployBase>/v2/function/<name>`
    pub fn function_url(&self, function_name: &str) -> String {
        format!("{}/v2/function/{}", self.deploy_endpoint, function_name)
    }

    /// URL the deployed function answers on.
    pub fn invoke_url(&self, function_name: &str) -> String {
        invoke_url(&self.invoke_endpoint, &self.credentials.account_id, function_name)
    }

    /// Upload `artifact` as the code of `function`; returns its invocation URL.
    ///
    /// # Errors
    ///
    /// - `Error::DeployRejected` if the service answers with an `errorCode`
    /// - `Error::UploadFailed` on any other non-2xx response
    /// - `Error::NoBackendReachable` on connection failure
    pub async fn upload(
        &self,
        artifact: &Artifact,
        function: &ValidatedFunction,
    ) -> Result<String> {
        let url = self.function_url(&function.name);
        let request_id = Uuid::new_v4();

        let mut query: Vec<(&str, String)> = vec![
            ("file", function.file.clone()),
            ("entrypoint", function.entrypoint.clone()),
            ("runtime", function.runtime.to_string()),
        ];
        if !function.env.is_empty() {
            let env = serde_json::to_string(&function.env).map_err(packaging)?;
            query.push(("env", env));
        }

        let archive = tokio::fs::File::open(artifact.path())
            .await
            .map_err(|e| Error::storage(artifact.path(), e))?;

        debug!(
            url = %url,
            request_id = %request_id,
            bytes = artifact.size(),
            "Uploading function"
        );
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.credentials.api_key)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .query(&query)
            .body(Body::wrap_stream(ReaderStream::new(archive)))
            .send()
            .await
            .map_err(|e| unreachable(&url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unreachable(&url, e))?;
        if let Err(err) = interpret_deploy_response(status, &body) {
            warn!(
                status = status.as_u16(),
                request_id = %request_id,
                error = %err,
                "Upload failed"
            );
            return Err(err);
        }

        let invoke_url = self.invoke_url(&function.name);
        info!(function = %function.name, url = %invoke_url, "Function deployed");
        Ok(invoke_url)
    }

    /// Delete a deployed function.
    pub async fn remove(&self, function_name: &str) -> Result<()> {
        let url = self.function_url(function_name);

        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.credentials.api_key)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| unreachable(&url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unreachable(&url, e))?;
        interpret_deploy_response(status, &body)?;

        info!(function = function_name, "Function removed");
        Ok(())
    }

    /// Invoke a deployed function with an optional JSON payload; returns the
    /// response body.
    pub async fn invoke(
        &self,
        function_name: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<String> {
        let url = self.invoke_url(function_name);

        let mut request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.credentials.api_key);
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| unreachable(&url, e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| unreachable(&url, e))?;

        if !status.is_success() {
            return Err(Error::InvokeFailed {
                status: status.as_u16(),
                body,
            });
        }
        debug!(function = function_name, bytes = body.len(), "Function invoked");
        Ok(body)
    }
}

/// Load, validate, package and upload the single function in `function_dir`.
///
/// Returns the invocation URL.
pub async fn deploy_from_dir(
    store: &DescriptorStore,
    deployer: &Deployer,
    function_dir: &Path,
    exclude: &[PathBuf],
) -> Result<String> {
    let descriptor = store.load(&DescriptorStore::path_in(function_dir))?;
    let name = descriptor.single_function_name()?;
    let function = store.validate(name, descriptor.get(name)?, function_dir)?;

    let source = function_dir.to_path_buf();
    let exclude = exclude.to_vec();
    let artifact = tokio::task::spawn_blocking(move || package(&source, &exclude))
        .await
        .map_err(packaging)??;

    deployer.upload(&artifact, &function).await
}

use std::{env, path::PathBuf};

use url::Url;

use crate::{builder::default_endpoint, tenant::InvalidTenant, FetchConfig, FetchConfigSource};

const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";

/// Configuration from environment variables.
///
/// The default source reads `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_FEDERATED_TOKEN_FILE`,
/// but each can be overridden with the `with_*` methods. All three are required. Values are
/// trimmed, and blank values count as missing, whether read or overridden.
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use federated_token_fetch::{EnvSource, TokenFetch};
///
/// let source = EnvSource::default().with_output_file("/var/run/secrets/token");
///
/// let fetch = TokenFetch::builder()
///     .config(source)
///     .build_interactive()
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug, Default)]
pub struct EnvSource {
    tenant_id: Option<String>,
    client_id: Option<String>,
    output_file: Option<PathBuf>,
    endpoint: Option<Url>,
}

impl EnvSource {
    /// Set the tenant instead of reading `AZURE_TENANT_ID`.
    #[must_use]
    pub fn with_tenant_id(self, tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..self
        }
    }

    /// Set the client ID instead of reading `AZURE_CLIENT_ID`.
    #[must_use]
    pub fn with_client_id(self, client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..self
        }
    }

    /// Set the output file instead of reading `AZURE_FEDERATED_TOKEN_FILE`.
    #[must_use]
    pub fn with_output_file(self, path: impl Into<PathBuf>) -> Self {
        Self {
            output_file: Some(path.into()),
            ..self
        }
    }

    /// Call `endpoint` instead of the default workload-identity endpoint.
    #[must_use]
    pub fn with_endpoint(self, endpoint: Url) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..self
        }
    }

    fn resolve(self) -> Result<FetchConfig, EnvConfigError> {
        let tenant_id = match self.tenant_id {
            Some(value) => non_empty(value),
            None => read_env(AZURE_TENANT_ID)?,
        };
        let client_id = match self.client_id {
            Some(value) => non_empty(value),
            None => read_env(AZURE_CLIENT_ID)?,
        };
        let output_file = match self.output_file {
            Some(path) => non_empty_path(path),
            None => read_env(AZURE_FEDERATED_TOKEN_FILE)?.map(PathBuf::from),
        };

        match (tenant_id, client_id, output_file) {
            (Some(tenant_id), Some(client_id), Some(output_file)) => Ok(FetchConfig {
                tenant: tenant_id.parse()?,
                client_id,
                output_file,
                endpoint: self.endpoint.unwrap_or_else(default_endpoint),
            }),
            (tenant_id, client_id, output_file) => {
                let missing = [
                    (AZURE_TENANT_ID, tenant_id.is_none()),
                    (AZURE_CLIENT_ID, client_id.is_none()),
                    (AZURE_FEDERATED_TOKEN_FILE, output_file.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, is_missing)| is_missing.then_some(name))
                .collect();
                Err(EnvConfigError::Missing(missing))
            }
        }
    }
}

impl FetchConfigSource for EnvSource {
    type Future = futures::future::Ready<Result<FetchConfig, Self::Error>>;

    type Error = EnvConfigError;

    fn load(self) -> Self::Future {
        futures::future::ready(self.resolve())
    }
}

/// An error indicating missing or invalid configuration.
///
/// The error message should be sufficient to aid end-user debugging.
#[derive(Debug, thiserror::Error)]
pub enum EnvConfigError {
    /// Required environment variables are unset or empty.
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    /// An environment variable isn't valid UTF-8.
    #[error("invalid value in environment variable {name}: {value} contains invalid UTF-8")]
    NotUnicode {
        /// The variable name.
        name: &'static str,
        /// The lossy value.
        value: String,
    },

    /// The tenant can't be used to sign in.
    #[error(transparent)]
    InvalidTenant(#[from] InvalidTenant),
}

fn read_env(name: &'static str) -> Result<Option<String>, EnvConfigError> {
    match env::var(name) {
        Ok(value) => Ok(non_empty(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(data)) => Err(EnvConfigError::NotUnicode {
            name,
            value: data.to_string_lossy().into_owned(),
        }),
    }
}

/// Trim surrounding whitespace, treating a blank value as absent.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

fn non_empty_path(path: PathBuf) -> Option<PathBuf> {
    match path.into_os_string().into_string() {
        Ok(path) => non_empty(path).map(PathBuf::from),
        // Not UTF-8, so not blank either.
        Err(path) => Some(PathBuf::from(path)),
    }
}

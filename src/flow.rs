use std::{convert::Infallible, fmt, path::PathBuf};

use crate::{
    endpoint::{self, NetworkError},
    output::{self, FilesystemError},
    EnvConfigError, FetchConfig, InteractiveBrowserCredential, TokenCredential, TokenFetchBuilder,
};

/// A configured token fetch.
///
/// A default fetch can be constructed with [`new`](TokenFetch::new).
#[allow(clippy::module_name_repetitions)]
pub struct TokenFetch<C> {
    config: FetchConfig,
    credential: C,
    endpoint_client: endpoint::Client,
    require_success: bool,
}

impl TokenFetch<Infallible> {
    /// Construct a builder for a token fetch.
    ///
    /// Use this to override the default configuration or credential.
    #[must_use]
    pub fn builder() -> TokenFetchBuilder {
        TokenFetchBuilder::default()
    }
}

impl TokenFetch<InteractiveBrowserCredential> {
    /// Configure a token fetch from the environment that signs in through the browser.
    ///
    /// Configuration is read from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
    /// `AZURE_FEDERATED_TOKEN_FILE`. For more flexible configuration see [`TokenFetchBuilder`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use federated_token_fetch::TokenFetch;
    ///
    /// let fetch = TokenFetch::new().await?;
    /// println!("signing in for {}", fetch.config().scope());
    ///
    /// let outcome = fetch.run().await?;
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    ///
    /// An error is returned if a required variable is missing or invalid.
    pub async fn new() -> Result<Self, EnvConfigError> {
        TokenFetchBuilder::default().build_interactive().await
    }
}

impl<C> TokenFetch<C> {
    pub(crate) fn build(config: FetchConfig, credential: C, require_success: bool) -> Self {
        Self {
            config,
            credential,
            endpoint_client: endpoint::Client::new(),
            require_success,
        }
    }

    /// The configuration this fetch runs with.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

impl<C> TokenFetch<C>
where
    C: TokenCredential,
{
    /// Obtain an access token, call the endpoint with it, and save the response.
    ///
    /// The output file (and any missing parent directories) is only touched once the endpoint
    /// has answered. Unless [`require_success`](TokenFetchBuilder::require_success) was set, the
    /// body is saved whatever the response status.
    ///
    /// # Errors
    ///
    /// An error is returned if any step fails. See [`FetchFlowError`] for details.
    pub async fn run(&self) -> Result<FetchOutcome, FetchFlowError<C::Error>> {
        let scope = self.config.scope();
        tracing::debug!(%scope, "requesting access token");
        let token = self
            .credential
            .get_token(&scope)
            .await
            .map_err(FetchFlowError::Authentication)?;

        tracing::debug!(endpoint = %self.config.endpoint, "requesting workload identity token");
        let response = self
            .endpoint_client
            .get_workload_identity_token(&self.config.endpoint, &token)
            .await?;

        if !response.is_success() {
            if self.require_success {
                return Err(StatusError {
                    status: response.status,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                }
                .into());
            }
            tracing::warn!(
                status = response.status,
                "endpoint returned an error status; saving the response anyway"
            );
        }

        output::write_output(&self.config.output_file, &response.body).await?;
        tracing::info!(
            path = %self.config.output_file.display(),
            bytes = response.body.len(),
            "saved endpoint response"
        );

        Ok(FetchOutcome {
            status: response.status,
            output_file: self.config.output_file.clone(),
            bytes_written: response.body.len(),
        })
    }
}

impl<C> fmt::Debug for TokenFetch<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenFetch")
            .field("config", &self.config)
            .field("credential", &format_args!("{}", std::any::type_name::<C>()))
            .field("endpoint_client", &self.endpoint_client)
            .field("require_success", &self.require_success)
            .finish()
    }
}

/// The result of a successful [`TokenFetch::run`].
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOutcome {
    /// The HTTP status the endpoint responded with.
    pub status: u16,

    /// Where the response body was saved.
    pub output_file: PathBuf,

    /// How many bytes were written.
    pub bytes_written: usize,
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason());
        match reason {
            Some(reason) => write!(f, "Response [{} {reason}]", self.status),
            None => write!(f, "Response [{}]", self.status),
        }
    }
}

/// An error that occurred while fetching the token.
#[derive(Debug, thiserror::Error)]
pub enum FetchFlowError<P: std::error::Error + Send + Sync + 'static> {
    /// The credential failed to provide an access token.
    ///
    /// For interactive sign-in this includes a refused consent, an expired session, or a network
    /// failure talking to the identity provider.
    #[error("authentication failed")]
    Authentication(#[source] P),

    /// The endpoint couldn't be reached.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The endpoint responded with an error status and a 2xx status was required.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The response couldn't be saved.
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// The endpoint responded with a non-2xx status.
#[derive(Debug, thiserror::Error)]
#[error("endpoint responded with status {status}: {body}")]
pub struct StatusError {
    status: u16,
    body: String,
}

impl StatusError {
    /// The HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response body, lossily decoded.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }
}

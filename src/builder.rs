use std::{convert::Infallible, path::PathBuf};

use url::Url;

use crate::{
    endpoint::DEFAULT_ENDPOINT, EnvSource, InteractiveBrowserCredential, Tenant, TokenCredential,
    TokenFetch,
};

/// Builder for [`TokenFetch`].
///
/// This allows the configuration source, the credential, and status handling to be changed.
///
/// # Example
///
/// ```
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::convert::Infallible;
///
/// use federated_token_fetch::{AccessToken, FetchConfig, TokenFetchBuilder};
///
/// let fetch = TokenFetchBuilder::new()
///     // use hard-coded configuration instead of reading the environment
///     .config(FetchConfig::new(
///         "contoso.onmicrosoft.com".parse()?,
///         "my-app",
///         "/tmp/federated-token",
///     ))
///     // supply the token some other way than an interactive sign-in
///     .credential(|_scope: String| async move {
///         Ok::<_, Infallible>(AccessToken::bearer("pre-issued"))
///     })
///     // don't write the file unless the endpoint answers 2xx
///     .require_success(true)
///     .build()
///     .await
///     .expect("infallible");
/// # Ok(())
/// # }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct TokenFetchBuilder<S = EnvSource, C = Infallible> {
    config_source: S,
    credential: Option<C>,
    require_success: bool,
}

impl TokenFetchBuilder<EnvSource, Infallible> {
    /// Construct a [`TokenFetch`] builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for TokenFetchBuilder<EnvSource, Infallible> {
    fn default() -> Self {
        Self {
            config_source: EnvSource::default(),
            credential: None,
            require_success: false,
        }
    }
}

impl<S, C> TokenFetchBuilder<S, C> {
    /// Set the configuration source.
    ///
    /// By default, configuration is read from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
    /// `AZURE_FEDERATED_TOKEN_FILE`.
    #[must_use]
    pub fn config<NewS>(self, config_source: NewS) -> TokenFetchBuilder<NewS, C>
    where
        NewS: FetchConfigSource,
    {
        TokenFetchBuilder {
            config_source,
            credential: self.credential,
            require_success: self.require_success,
        }
    }

    /// Set the credential used to obtain the access token.
    ///
    /// Without one, use [`build_interactive`](TokenFetchBuilder::build_interactive) to sign in
    /// through the browser.
    #[must_use]
    pub fn credential<NewC>(self, credential: NewC) -> TokenFetchBuilder<S, NewC>
    where
        NewC: TokenCredential,
    {
        TokenFetchBuilder {
            config_source: self.config_source,
            credential: Some(credential),
            require_success: self.require_success,
        }
    }

    /// Only write the output file if the endpoint responds with a 2xx status.
    ///
    /// By default the response body is written whatever the status.
    #[must_use]
    pub fn require_success(self, require_success: bool) -> Self {
        Self {
            require_success,
            ..self
        }
    }
}

impl<S, C> TokenFetchBuilder<S, C>
where
    S: FetchConfigSource,
    C: TokenCredential,
{
    /// Build a [`TokenFetch`] with the given configuration and credential.
    ///
    /// # Errors
    ///
    /// Returns any errors encountered when loading the [`FetchConfigSource`].
    pub async fn build(self) -> Result<TokenFetch<C>, S::Error> {
        let config = self.config_source.load().await?;

        // `new` sets `C = Infallible`, which doesn't impl `TokenCredential`, so for
        // `C: TokenCredential` to hold `credential` must have been called and set it.
        let credential = self.credential.expect("credential must be set");

        Ok(TokenFetch::build(config, credential, self.require_success))
    }
}

impl<S> TokenFetchBuilder<S, Infallible>
where
    S: FetchConfigSource,
{
    /// Build a [`TokenFetch`] that signs in through the browser to the configured tenant.
    ///
    /// # Errors
    ///
    /// Returns any errors encountered when loading the [`FetchConfigSource`].
    pub async fn build_interactive(
        self,
    ) -> Result<TokenFetch<InteractiveBrowserCredential>, S::Error> {
        let config = self.config_source.load().await?;
        let credential = InteractiveBrowserCredential::new(config.tenant.clone());

        Ok(TokenFetch::build(config, credential, self.require_success))
    }
}

/// A source of [`FetchConfig`].
///
/// This trait is more intended to facilitate precise error handling in
/// [`TokenFetchBuilder::build`], but it could also be used to implement alternative configuration
/// sources.
pub trait FetchConfigSource {
    /// The future returned by the config source.
    type Future: std::future::Future<Output = Result<FetchConfig, Self::Error>>;

    /// The error that might occur when sourcing the configuration.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the configuration.
    fn load(self) -> Self::Future;
}

/// Token fetch configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchConfig {
    /// The tenant to sign in to.
    pub tenant: Tenant,

    /// The client (application) ID whose API the access token is for.
    ///
    /// This determines the scope, see [`scope`](Self::scope).
    pub client_id: String,

    /// Where the response body is written.
    pub output_file: PathBuf,

    /// The workload-identity token endpoint.
    pub endpoint: Url,
}

impl FetchConfig {
    /// Construct a configuration that calls the default endpoint.
    pub fn new(
        tenant: Tenant,
        client_id: impl Into<String>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tenant,
            client_id: client_id.into(),
            output_file: output_file.into(),
            endpoint: default_endpoint(),
        }
    }

    /// Call `endpoint` instead of the default.
    #[must_use]
    pub fn with_endpoint(self, endpoint: Url) -> Self {
        Self { endpoint, ..self }
    }

    /// The scope access tokens are requested for: `api://{client_id}/access_as_user`.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("api://{}/access_as_user", self.client_id)
    }
}

impl FetchConfigSource for FetchConfig {
    type Future = futures::future::Ready<Result<Self, Self::Error>>;

    type Error = Infallible;

    fn load(self) -> Self::Future {
        futures::future::ready(Ok(self))
    }
}

pub(crate) fn default_endpoint() -> Url {
    DEFAULT_ENDPOINT
        .parse()
        .expect("default endpoint should be a valid URL")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FetchConfig {
        FetchConfig::new(Tenant::organizations(), "my-client", "out/token.txt")
    }

    #[test]
    fn scope_embeds_client_id() {
        assert_eq!(config().scope(), "api://my-client/access_as_user");
    }

    #[test]
    fn default_endpoint_is_workload_identity_endpoint() {
        assert_eq!(config().endpoint.as_str(), DEFAULT_ENDPOINT);

        let other: Url = "http://localhost:8080/token".parse().unwrap();
        assert_eq!(config().with_endpoint(other.clone()).endpoint, other);
    }

    #[tokio::test]
    async fn builds_interactive_from_static_config() {
        let fetch = TokenFetchBuilder::new()
            .config(config())
            .build_interactive()
            .await
            .unwrap();

        assert_eq!(fetch.config(), &config());
        let debug = format!("{fetch:?}");
        assert!(debug.contains("InteractiveBrowserCredential"), "{debug}");
    }
}

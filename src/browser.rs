//! Interactive browser sign-in (authorization code grant with PKCE).

use std::{fmt, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    redirect::{AuthorizationRedirect, RedirectListener},
    AccessToken, OpenBrowser, Tenant, TokenCredential, VerificationPrompt,
};

/// The public cloud sign-in host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// The well-known public client application used to sign in when no other is configured.
pub const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// A credential that signs the user in through their web browser.
///
/// Each call to [`get_token`](Self::get_token) starts a loopback listener, hands the authorize URL
/// to the [`VerificationPrompt`] (by default [`OpenBrowser`]) and waits for the browser to be
/// redirected back with an authorization code, which is then redeemed for an access token.
///
/// Waiting has no time limit unless one is set with
/// [`with_login_timeout`](Self::with_login_timeout).
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use federated_token_fetch::InteractiveBrowserCredential;
///
/// let credential = InteractiveBrowserCredential::new("contoso.onmicrosoft.com".parse()?);
/// let token = credential.get_token("api://my-app/access_as_user").await?;
/// # Ok(()) }
/// ```
pub struct InteractiveBrowserCredential<V = OpenBrowser> {
    http: reqwest::Client,
    authority_host: String,
    tenant: Tenant,
    client_id: String,
    redirect_port: u16,
    login_timeout: Option<Duration>,
    verification_prompt: V,
}

impl InteractiveBrowserCredential<OpenBrowser> {
    /// Construct a credential that signs in to `tenant` with the default public client and opens
    /// the system browser.
    #[must_use]
    pub fn new(tenant: Tenant) -> Self {
        Self {
            http: reqwest::Client::new(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_port: 0,
            login_timeout: None,
            verification_prompt: OpenBrowser,
        }
    }
}

impl<V> InteractiveBrowserCredential<V> {
    /// Set the sign-in host, e.g. for a sovereign cloud.
    #[must_use]
    pub fn with_authority_host(self, authority_host: impl Into<String>) -> Self {
        Self {
            authority_host: authority_host.into(),
            ..self
        }
    }

    /// Set the client (application) ID used to sign in.
    ///
    /// The application must be registered as a public client with `http://localhost` as a
    /// redirect URI.
    #[must_use]
    pub fn with_client_id(self, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..self
        }
    }

    /// Set the loopback port that receives the redirect. The default, 0, picks a free port.
    #[must_use]
    pub fn with_redirect_port(self, port: u16) -> Self {
        Self {
            redirect_port: port,
            ..self
        }
    }

    /// Give up if sign-in hasn't completed within `timeout`.
    #[must_use]
    pub fn with_login_timeout(self, timeout: Duration) -> Self {
        Self {
            login_timeout: Some(timeout),
            ..self
        }
    }

    /// Set the prompt used to send the user to the authorize URL.
    #[must_use]
    pub fn with_verification_prompt<NewV>(
        self,
        verification_prompt: NewV,
    ) -> InteractiveBrowserCredential<NewV>
    where
        NewV: VerificationPrompt,
    {
        InteractiveBrowserCredential {
            http: self.http,
            authority_host: self.authority_host,
            tenant: self.tenant,
            client_id: self.client_id,
            redirect_port: self.redirect_port,
            login_timeout: self.login_timeout,
            verification_prompt,
        }
    }

    fn authority_endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{leaf}",
            self.authority_host.trim_end_matches('/'),
            self.tenant
        )
    }
}

impl<V> InteractiveBrowserCredential<V>
where
    V: VerificationPrompt,
{
    /// Sign in interactively and obtain an access token for `scope`.
    ///
    /// # Errors
    ///
    /// See [`BrowserCredentialError`] for the ways sign-in can fail.
    pub async fn get_token(
        &self,
        scope: &str,
    ) -> Result<AccessToken, BrowserCredentialError<V::Error>> {
        match self.login_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.login(scope))
                .await
                .map_err(|_elapsed| BrowserCredentialError::Timeout)?,
            None => self.login(scope).await,
        }
    }

    async fn login(&self, scope: &str) -> Result<AccessToken, BrowserCredentialError<V::Error>> {
        let listener = RedirectListener::bind(self.redirect_port)
            .await
            .map_err(BrowserCredentialError::Listener)?;
        let redirect_uri = listener.redirect_uri();
        let pkce = Pkce::new();
        let state = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>());

        let authorize_url = self.authorize_url(scope, &redirect_uri, &pkce, &state)?;
        tracing::debug!(tenant = %self.tenant, %redirect_uri, "waiting for interactive sign-in");

        self.verification_prompt
            .clone()
            .prompt(authorize_url)
            .await
            .map_err(BrowserCredentialError::VerificationPrompt)?;

        let code = match listener
            .wait()
            .await
            .map_err(BrowserCredentialError::Listener)?
        {
            AuthorizationRedirect::Code {
                code,
                state: Some(returned),
            } if returned == state => code,
            AuthorizationRedirect::Code { .. } => return Err(BrowserCredentialError::StateMismatch),
            AuthorizationRedirect::Error { error, description } => {
                return Err(BrowserCredentialError::Provider {
                    error,
                    description: description.unwrap_or_default(),
                })
            }
        };

        self.redeem_code(RedeemCodeRequest {
            code: &code,
            redirect_uri: &redirect_uri,
            code_verifier: &pkce.verifier,
            scope,
        })
        .await
    }

    fn authorize_url(
        &self,
        scope: &str,
        redirect_uri: &str,
        pkce: &Pkce,
        state: &str,
    ) -> Result<Url, BrowserCredentialError<V::Error>> {
        Url::parse_with_params(
            &self.authority_endpoint("authorize"),
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("scope", scope),
                ("state", state),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("response_mode", "query"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(BrowserCredentialError::InvalidAuthority)
    }

    async fn redeem_code(
        &self,
        request: RedeemCodeRequest<'_>,
    ) -> Result<AccessToken, BrowserCredentialError<V::Error>> {
        let response = self
            .http
            .post(self.authority_endpoint("token"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", request.code),
                ("redirect_uri", request.redirect_uri),
                ("code_verifier", request.code_verifier),
                ("scope", request.scope),
            ])
            .send()
            .await
            .map_err(BrowserCredentialError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(BrowserCredentialError::Http)?;
            return Err(BrowserCredentialError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let response: TokenResponse = response
            .json()
            .await
            .map_err(BrowserCredentialError::MalformedResponse)?;
        tracing::debug!(expires_in = ?response.expires_in, "redeemed authorization code");

        Ok(response.into())
    }
}

impl<V> TokenCredential for InteractiveBrowserCredential<V>
where
    V: VerificationPrompt,
{
    type Error = BrowserCredentialError<V::Error>;

    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken, Self::Error>> {
        Box::pin(InteractiveBrowserCredential::get_token(self, scope))
    }
}

impl<V> fmt::Debug for InteractiveBrowserCredential<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InteractiveBrowserCredential")
            .field("authority_host", &self.authority_host)
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("redirect_port", &self.redirect_port)
            .field("login_timeout", &self.login_timeout)
            .field("verification_prompt", &"_")
            .finish_non_exhaustive()
    }
}

/// An error that occurred during interactive sign-in.
#[derive(Debug, thiserror::Error)]
pub enum BrowserCredentialError<P: std::error::Error + Send + Sync + 'static> {
    /// The loopback listener for the redirect couldn't be started or failed while waiting.
    #[error("redirect listener failed")]
    Listener(#[source] std::io::Error),

    /// The configured authority host doesn't form a valid URL.
    #[error("invalid sign-in authority")]
    InvalidAuthority(#[source] url::ParseError),

    /// An error occurred during the verification prompt.
    ///
    /// See [`VerificationPrompt`] for more information.
    #[error("sign-in failed during verification")]
    VerificationPrompt(#[source] P),

    /// The redirect carried a different `state` than the one sent.
    #[error("sign-in response did not match the request (state mismatch)")]
    StateMismatch,

    /// The identity provider redirected back with an error, e.g. consent was denied.
    #[error("sign-in was refused by the identity provider: {error} {description}")]
    Provider {
        /// The OAuth error code.
        error: String,
        /// The human readable description, if any.
        description: String,
    },

    /// The token request couldn't be completed.
    #[error("token request failed")]
    Http(#[source] reqwest::Error),

    /// The identity provider refused to redeem the authorization code.
    #[error("token request failed with status {status}: {body}")]
    TokenExchange {
        /// The HTTP status code.
        status: u16,
        /// The response body, usually a JSON error document.
        body: String,
    },

    /// The token response couldn't be parsed.
    #[error("invalid token response")]
    MalformedResponse(#[source] reqwest::Error),

    /// Sign-in did not complete within the configured timeout.
    #[error("sign-in timed out waiting for the browser")]
    Timeout,
}

struct RedeemCodeRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    scope: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for AccessToken {
    fn from(res: TokenResponse) -> Self {
        Self {
            token: res.access_token,
            token_type: res.token_type.unwrap_or_else(|| "Bearer".to_string()),
            // An out-of-range lifetime leaves the expiry unknown.
            expires_at: res.expires_in.and_then(|secs| {
                chrono::Duration::try_seconds(secs)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            }),
        }
    }
}

struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn new() -> Self {
        Self::from_verifier(URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>()))
    }

    fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, convert::Infallible};

    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const TENANT: &str = "contoso.onmicrosoft.com";
    const SCOPE: &str = "api://test-client/access_as_user";

    // A prompt that plays the browser: it follows the authorize URL's redirect_uri with the query
    // produced by `query` from the request's state.
    fn simulated_browser<Q>(query: Q) -> impl VerificationPrompt
    where
        Q: Fn(&str) -> String + Clone + Send + Sync + 'static,
    {
        move |url: Url| async move {
            let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
            let redirect = format!("{}/?{}", params["redirect_uri"], query(&params["state"]));
            tokio::spawn(async move {
                let _ = reqwest::get(redirect).await;
            });
            Ok::<_, Infallible>(())
        }
    }

    fn credential<V>(server: &Server, prompt: V) -> InteractiveBrowserCredential<V>
    where
        V: VerificationPrompt,
    {
        InteractiveBrowserCredential::new(TENANT.parse().unwrap())
            .with_authority_host(server.url_str("/"))
            .with_verification_prompt(prompt)
    }

    #[test]
    fn pkce_challenge_is_s256_of_verifier() {
        // RFC 7636, appendix B
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn pkce_verifiers_are_random() {
        let a = Pkce::new();
        let b = Pkce::new();
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.verifier.len(), 43);
    }

    #[test]
    fn authorize_url_carries_request() {
        let credential = InteractiveBrowserCredential::new(TENANT.parse().unwrap())
            .with_client_id("login-app");
        let pkce = Pkce::from_verifier("verifier".to_string());
        let url = credential
            .authorize_url(SCOPE, "http://localhost:4321", &pkce, "the-state")
            .unwrap();

        assert_eq!(url.host_str(), Some("login.microsoftonline.com"));
        assert_eq!(url.path(), "/contoso.onmicrosoft.com/oauth2/v2.0/authorize");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "login-app");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:4321");
        assert_eq!(params["scope"], SCOPE);
        assert_eq!(params["state"], "the-state");
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn debug_hides_prompt() {
        let credential = InteractiveBrowserCredential::new(Tenant::organizations());
        let debug = format!("{credential:?}");
        assert!(debug.contains(DEFAULT_CLIENT_ID), "{debug}");
        assert!(debug.contains("organizations"), "{debug}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_redeems_code() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/contoso.onmicrosoft.com/oauth2/v2.0/token"),
                request::body(url_decoded(contains(("code", "test-code")))),
                request::body(url_decoded(contains(("grant_type", "authorization_code")))),
                request::body(url_decoded(contains(("client_id", DEFAULT_CLIENT_ID)))),
                request::body(url_decoded(contains(("scope", SCOPE)))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("Content-Type", "application/json")
                    .body(
                        json!({
                            "access_token": "test-access-token",
                            "token_type": "Bearer",
                            "expires_in": 3600,
                        })
                        .to_string(),
                    ),
            ),
        );

        let prompt = simulated_browser(|state: &str| format!("code=test-code&state={state}"));
        let now = Utc::now();
        let token = credential(&server, prompt).get_token(SCOPE).await?;

        assert_eq!(token.token, "test-access-token");
        assert_eq!(token.token_type, "Bearer");
        assert!(
            token
                .expires_at
                .is_some_and(|at| at >= now + chrono::Duration::seconds(3600)),
            "{token:?}"
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_tolerates_out_of_range_expiry() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/contoso.onmicrosoft.com/oauth2/v2.0/token",
            ))
            .respond_with(
                status_code(200)
                    .append_header("Content-Type", "application/json")
                    .body(
                        json!({
                            "access_token": "long-lived",
                            "expires_in": 9_223_372_036_854_775_i64,
                        })
                        .to_string(),
                    ),
            ),
        );

        let prompt = simulated_browser(|state: &str| format!("code=test-code&state={state}"));
        let token = credential(&server, prompt).get_token(SCOPE).await?;

        assert_eq!(token.token, "long-lived");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_at, None);
        Ok(())
    }

    #[test]
    fn expiry_overflow_is_unknown() {
        for expires_in in [i64::MAX, i64::MIN, 9_223_372_036_854_775] {
            let token = AccessToken::from(TokenResponse {
                access_token: "t".to_string(),
                token_type: None,
                expires_in: Some(expires_in),
            });
            assert_eq!(token.expires_at, None, "expires_in = {expires_in}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_rejects_state_mismatch() {
        let server = Server::run();
        let prompt = simulated_browser(|_state: &str| "code=test-code&state=forged".to_string());

        let error = credential(&server, prompt)
            .get_token(SCOPE)
            .await
            .expect_err("state mismatch should fail");
        assert!(
            matches!(error, BrowserCredentialError::StateMismatch),
            "{error:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_reports_provider_error() {
        let server = Server::run();
        let prompt = simulated_browser(|state: &str| {
            format!("error=access_denied&error_description=consent+denied&state={state}")
        });

        let error = credential(&server, prompt)
            .get_token(SCOPE)
            .await
            .expect_err("provider error should fail");
        match error {
            BrowserCredentialError::Provider { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "consent denied");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_reports_token_exchange_failure() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/contoso.onmicrosoft.com/oauth2/v2.0/token",
            ))
            .respond_with(status_code(400).body(r#"{"error":"invalid_grant"}"#)),
        );
        let prompt = simulated_browser(|state: &str| format!("code=stale&state={state}"));

        let error = credential(&server, prompt)
            .get_token(SCOPE)
            .await
            .expect_err("token exchange should fail");
        match error {
            BrowserCredentialError::TokenExchange { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"), "{body}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_in_times_out() {
        let server = Server::run();
        let prompt = |_url: Url| async move { Ok::<_, Infallible>(()) };

        let error = credential(&server, prompt)
            .with_login_timeout(Duration::from_millis(50))
            .get_token(SCOPE)
            .await
            .expect_err("sign-in should time out");
        assert!(matches!(error, BrowserCredentialError::Timeout), "{error:?}");
    }
}

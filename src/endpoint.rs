//! Client for the workload-identity token endpoint.

use std::fmt;

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use url::Url;

use crate::AccessToken;

/// The endpoint that exchanges a user access token for a workload identity token.
pub const DEFAULT_ENDPOINT: &str =
    "https://prod-feature.runners.gitlab.private.key.store/api/Token/GetWorkloadIdentityToken";

const CLIENT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub(crate) struct Client {
    inner: reqwest::Client,
}

impl Client {
    /// A client with no request timeout, so slow endpoints are waited on indefinitely.
    pub(crate) fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    pub(crate) async fn get_workload_identity_token(
        &self,
        endpoint: &Url,
        access_token: &AccessToken,
    ) -> Result<EndpointResponse, NetworkError> {
        let network_error = |error| NetworkError {
            endpoint: endpoint.to_string(),
            error,
        };

        let response = self
            .inner
            .get(endpoint.clone())
            .header(AUTHORIZATION, access_token.authorization())
            .header(ACCEPT, "text/plain")
            .header(USER_AGENT, CLIENT_NAME)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network_error)?.to_vec();

        Ok(EndpointResponse { status, body })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) struct EndpointResponse {
    pub(crate) status: u16,
    pub(crate) body: Vec<u8>,
}

impl EndpointResponse {
    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The token endpoint couldn't be reached or its response couldn't be read.
///
/// This covers DNS failures, refused connections, TLS errors and broken response bodies. An HTTP
/// error status is not a `NetworkError`.
#[derive(Debug, thiserror::Error)]
#[error("request to {endpoint} failed")]
pub struct NetworkError {
    endpoint: String,
    #[source]
    error: reqwest::Error,
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn sends_bearer_token_and_accept() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/Token/GetWorkloadIdentityToken"),
                request::headers(contains(("authorization", "Bearer the-token"))),
                request::headers(contains(("accept", "text/plain"))),
                request::headers(contains(key("user-agent"))),
            ])
            .times(1)
            .respond_with(status_code(200).body("hello-token")),
        );

        let endpoint: Url = server
            .url_str("/api/Token/GetWorkloadIdentityToken")
            .parse()?;
        let response = Client::new()
            .get_workload_identity_token(&endpoint, &AccessToken::bearer("the-token"))
            .await?;

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.body, b"hello-token");
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_a_response() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/token"))
                .respond_with(status_code(403).body("forbidden")),
        );

        let endpoint: Url = server.url_str("/token").parse()?;
        let response = Client::new()
            .get_workload_identity_token(&endpoint, &AccessToken::bearer("t"))
            .await?;

        assert_eq!(response.status, 403);
        assert!(!response.is_success());
        assert_eq!(response.body, b"forbidden");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() -> TestResult {
        // Bind then drop a listener to get a port nothing is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let endpoint: Url = format!("http://127.0.0.1:{port}/token").parse()?;
        let error = Client::new()
            .get_workload_identity_token(&endpoint, &AccessToken::bearer("t"))
            .await
            .expect_err("connection should be refused");

        assert!(error.to_string().contains(&endpoint.to_string()), "{error}");
        assert!(std::error::Error::source(&error).is_some());
        Ok(())
    }
}

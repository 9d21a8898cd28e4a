use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// An access token issued for a single scope.
///
/// The token string is sensitive and is not printed in `Debug` output.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    /// The token string.
    pub token: String,

    /// The token type reported by the issuer, normally `Bearer`.
    pub token_type: String,

    /// When the token expires, if the issuer said.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Construct a bearer token with no known expiry.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
        }
    }

    /// The value of an `Authorization` header presenting this token.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can obtain an access token for a scope.
///
/// [`InteractiveBrowserCredential`](crate::InteractiveBrowserCredential) is the usual
/// implementation. The trait is also implemented for async functions taking the scope and
/// returning `Result<AccessToken, E>`, which is how non-interactive environments (and tests) can
/// supply a token:
///
/// ```
/// use std::convert::Infallible;
///
/// use federated_token_fetch::{AccessToken, TokenCredential};
///
/// fn from_env() -> impl TokenCredential {
///     |_scope: String| async move {
///         Ok::<_, Infallible>(AccessToken::bearer("token-from-elsewhere"))
///     }
/// }
/// ```
pub trait TokenCredential: Send + Sync {
    /// An error that could occur when obtaining a token.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Obtain an access token for `scope`.
    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken, Self::Error>>;
}

impl<F, Fut, E> TokenCredential for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<AccessToken, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn get_token<'a>(&'a self, scope: &'a str) -> BoxFuture<'a, Result<AccessToken, E>> {
        Box::pin(self(scope.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    #[test]
    fn debug_censors_token() {
        let token = AccessToken::bearer("super-secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"), "{debug}");
        assert!(debug.contains("[censored]"), "{debug}");
        assert!(debug.contains("Bearer"), "{debug}");
    }

    #[test]
    fn authorization_header_value() {
        let token = AccessToken {
            token: "abc".to_string(),
            token_type: "bearer".to_string(),
            expires_at: None,
        };
        assert_eq!(token.authorization(), "Bearer abc");
    }

    #[tokio::test]
    async fn closures_are_credentials() {
        let credential = |scope: String| async move {
            Ok::<_, Infallible>(AccessToken::bearer(format!("token-for-{scope}")))
        };
        let token = credential.get_token("api://x/access_as_user").await.unwrap();
        assert_eq!(token.token, "token-for-api://x/access_as_user");
    }
}

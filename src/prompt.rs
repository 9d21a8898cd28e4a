use std::convert::Infallible;

use url::Url;

/// A sign-in prompt.
///
/// Interactive sign-in requires the user to visit the identity provider's authorize URL in a
/// browser. There are many ways this could be done depending on the context, so prompts are
/// modelled with this trait. The default, [`OpenBrowser`], launches the system browser.
///
/// The trait is implemented for async functions with a single `Url` argument and returning
/// `Result<(), E>`, so a trivial prompt could look like:
///
/// ```
/// use std::convert::Infallible;
///
/// use federated_token_fetch::VerificationPrompt;
///
/// fn prompt() -> impl VerificationPrompt {
///     |authorize_url| async move {
///         println!("Go to {authorize_url} to sign in");
///         Ok::<_, Infallible>(())
///     }
/// }
/// ```
///
/// The prompt should return once the user has been directed to the URL. The credential then waits
/// for the browser to be redirected back to it.
pub trait VerificationPrompt: Clone + Send + Sync {
    /// The future returned by the prompt.
    type Future: std::future::Future<Output = Result<(), Self::Error>> + Send;

    /// An error that could occur when attempting to prompt.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Direct the user to sign in at the given `authorize_url`.
    fn prompt(self, authorize_url: Url) -> Self::Future;
}

impl<F, Fut, E> VerificationPrompt for F
where
    F: FnOnce(Url) -> Fut + Clone + Send + Sync,
    Fut: std::future::Future<Output = Result<(), E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    type Future = Fut;
    type Error = E;

    fn prompt(self, authorize_url: Url) -> Fut {
        self(authorize_url)
    }
}

/// Open the authorize URL in the system browser.
///
/// The URL is always printed to stderr as well, so sign-in can still be completed by hand when no
/// browser can be launched (e.g. over SSH).
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenBrowser;

impl VerificationPrompt for OpenBrowser {
    type Future = futures::future::Ready<Result<(), Infallible>>;
    type Error = Infallible;

    fn prompt(self, authorize_url: Url) -> Self::Future {
        eprintln!("To sign in, use a web browser to open the page {authorize_url}");
        if let Err(error) = open::that(authorize_url.as_str()) {
            tracing::warn!(%error, "could not open a browser; open the sign-in page manually");
        }
        futures::future::ready(Ok(()))
    }
}

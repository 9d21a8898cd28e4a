#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! Fetch a workload identity token after an interactive Azure sign-in.
//!
//! The user signs in through their browser, the resulting access token (scoped to
//! `api://{AZURE_CLIENT_ID}/access_as_user`) is presented to the workload-identity token endpoint,
//! and the endpoint's response is saved to `AZURE_FEDERATED_TOKEN_FILE`.
//!
//! See [`fetch`] for the main entrypoint to the crate.
//!
//! ```no_run
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = federated_token_fetch::fetch().await?;
//! println!("Response saved to {}", outcome.output_file.display());
//! # Ok(()) }
//! ```

mod browser;
mod builder;
mod credential;
mod endpoint;
mod env;
mod flow;
mod output;
mod prompt;
mod redirect;
mod tenant;

use std::convert::Infallible;

pub use crate::{
    browser::{
        BrowserCredentialError, InteractiveBrowserCredential, DEFAULT_AUTHORITY_HOST,
        DEFAULT_CLIENT_ID,
    },
    builder::{FetchConfig, FetchConfigSource, TokenFetchBuilder},
    credential::{AccessToken, TokenCredential},
    endpoint::{NetworkError, DEFAULT_ENDPOINT},
    env::{EnvConfigError, EnvSource},
    flow::{FetchFlowError, FetchOutcome, StatusError, TokenFetch},
    output::FilesystemError,
    prompt::{OpenBrowser, VerificationPrompt},
    tenant::{InvalidTenant, Tenant},
};

/// Sign in through the browser, fetch the workload identity token, and save it.
///
/// Configuration is read from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
/// `AZURE_FEDERATED_TOKEN_FILE`. The system browser is opened at the sign-in page and the call
/// waits, without a time limit, until sign-in completes. The endpoint's response body is then
/// written to the output file (creating parent directories) whatever its status.
///
/// For more flexible configuration see [`TokenFetchBuilder`].
///
/// # Errors
///
/// An error is returned if a variable is missing or invalid, or if any step of the fetch fails.
/// You can separate configuration errors from fetch errors by using [`TokenFetch::new`] instead.
pub async fn fetch() -> Result<FetchOutcome, FetchError<BrowserCredentialError<Infallible>>> {
    let outcome = TokenFetch::new().await?.run().await?;
    Ok(outcome)
}

/// An error indicating either misconfiguration or a failure during the fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError<P: std::error::Error + Send + Sync + 'static> {
    /// Configuration was missing or invalid.
    #[error(transparent)]
    Config(#[from] EnvConfigError),

    /// Failure during the fetch.
    #[error(transparent)]
    Flow(#[from] FetchFlowError<P>),
}

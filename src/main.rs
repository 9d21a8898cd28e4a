use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    ignore_missing(dotenvy::dotenv())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let outcome = federated_token_fetch::fetch()
        .await
        .context("failed to fetch the federated token")?;

    println!("{outcome}");
    println!("Response saved to {}", outcome.output_file.display());

    Ok(())
}

/// A missing `.env` file is fine, the variables may come from the real environment.
fn ignore_missing<T>(loaded: dotenvy::Result<T>) -> anyhow::Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(error) if error.not_found() => Ok(()),
        Err(error) => Err(error).context("failed to load .env file"),
    }
}

//! The lessonflow HTTP server binary.

use anyhow::Context;
use lessonflow::config::ServiceConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading configuration; absence is fine.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env().context("reading configuration")?;
    lessonflow::server::serve(config)
        .await
        .context("running server")?;
    Ok(())
}

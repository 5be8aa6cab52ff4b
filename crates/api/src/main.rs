use anyhow::Context;

use stockledger_api::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load().context("failed to load configuration")?;
    stockledger_observability::init(settings.log.format);

    let app = stockledger_api::app::build_app_from_settings(&settings)
        .await
        .context("failed to initialize ledger store")?;

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(environment = %settings.environment, "listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

use anyhow::Context;

use omms_api::app::{build_app, build_state};
use omms_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    omms_observability::init(config.log_format);
    tracing::info!(?config, "starting omms-api");
    if config.insecure_secret {
        tracing::warn!("OMMS_JWT_SECRET not set; using insecure dev default");
    }

    let state = build_state(&config).await?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

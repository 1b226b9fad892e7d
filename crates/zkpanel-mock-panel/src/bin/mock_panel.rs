use std::{env, net::SocketAddr};

use anyhow::Context;
use zkpanel_mock_panel::{router, PanelSettings, DEFAULT_PORT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zkpanel_otel::init();

    let settings = PanelSettings::from_env();
    let port = env::var("MOCK_PANEL_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        target: "zkpanel::mock",
        key_required = settings.api_key.is_some(),
        failure_rate = settings.failure_rate,
        "mock panel listening on {}",
        addr
    );
    axum::serve(listener, router(settings))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

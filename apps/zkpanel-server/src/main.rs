use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use zkpanel_core::{load_config, write_schema_file, Config};
use zkpanel_kernel::Kernel;
use zkpanel_sync::{HttpTransport, SchedulerRegistry};

mod api;
mod app_state;
mod responses;
mod router;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

const DEFAULT_PORT: u16 = 8090;

#[derive(Debug, Parser)]
#[command(name = "zkpanel-server", version, about = "Per-workspace panel sync host")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "ZKPANEL_CONFIG")]
    config: Option<PathBuf>,
    /// Control API port (overrides config and ZKPANEL_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Directory for the SQLite store (overrides config and ZKPANEL_STATE_DIR).
    #[arg(long)]
    state_dir: Option<PathBuf>,
    /// Write the configuration JSON schema to this path and exit.
    #[arg(long, value_name = "PATH")]
    write_schema: Option<String>,
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => {
            let path = path.to_string_lossy();
            load_config(&path).with_context(|| format!("load config {path}"))?
        }
        None => Config::default(),
    };
    cfg.apply_env_overrides();
    if let Some(port) = args.port {
        cfg.runtime.port = Some(port);
    }
    if let Some(dir) = &args.state_dir {
        cfg.runtime.state_dir = Some(dir.to_string_lossy().into_owned());
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.write_schema {
        write_schema_file(path).with_context(|| format!("write schema {path}"))?;
        return Ok(());
    }

    zkpanel_otel::init();
    let cfg = resolve_config(&args)?;

    let state_dir = PathBuf::from(cfg.runtime.state_dir.as_deref().unwrap_or("state"));
    let kernel = Kernel::open(&state_dir)
        .with_context(|| format!("open store in {}", state_dir.display()))?;
    let transport = Arc::new(HttpTransport::new(&cfg.sync)?);
    let registry = Arc::new(SchedulerRegistry::new(kernel.clone(), transport, &cfg));
    registry.rehydrate().await;

    let state = AppState::new(kernel, registry.clone());
    let app = router::build(state);

    let bind = cfg.runtime.bind.as_deref().unwrap_or("127.0.0.1");
    let port = cfg.runtime.port.unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        target: "zkpanel::server",
        %addr,
        state_dir = %state_dir.display(),
        interval_secs = cfg.sync.interval_secs,
        "zkpanel server listening"
    );

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(target: "zkpanel::server", "http server exited with error: {err}");
    }

    info!(target: "zkpanel::server", "stopping sync schedulers");
    registry.dispose_all();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(target: "zkpanel::server", "failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!(target: "zkpanel::server", "shutdown signal received");
}

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};
use zkpanel_core::util::env_bool;

static SYNC_LOG_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Target whose events are mirrored to the rolling sync log.
pub const SYNC_TARGET: &str = "zkpanel::sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

/// Rolling sync-log settings read from `ZKPANEL_SYNC_LOG_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingLog {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl RollingLog {
    /// `None` unless `ZKPANEL_SYNC_LOG_ROLL` is a true-ish flag.
    pub fn from_env() -> Option<Self> {
        if env_bool("ZKPANEL_SYNC_LOG_ROLL") != Some(true) {
            return None;
        }
        let dir = std::env::var("ZKPANEL_SYNC_LOG_DIR")
            .ok()
            .or_else(|| std::env::var("ZKPANEL_LOGS_DIR").ok())
            .unwrap_or_else(|| "logs".to_string());
        let prefix = std::env::var("ZKPANEL_SYNC_LOG_PREFIX").unwrap_or_else(|_| "sync".into());
        let rotation = match std::env::var("ZKPANEL_SYNC_LOG_ROTATION")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        };
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }
}

/// Install the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus an optional rolling file of sync events.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    let Some(roll) = RollingLog::from_env() else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&roll.dir).is_err() {
        eprintln!("failed to create sync log directory {}", roll.dir);
    }
    let writer = match roll.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&roll.dir, &roll.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&roll.dir, &roll.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&roll.dir, &roll.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = SYNC_LOG_GUARD.set(guard);
    let targets = Targets::new().with_target(SYNC_TARGET, tracing::Level::DEBUG);
    let sync_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(sync_layer).try_init();
    tracing::info!(directory = %roll.dir, prefix = %roll.prefix, "rolling sync log enabled");
}

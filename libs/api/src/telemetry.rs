//! Logging setup and process-lifecycle helpers shared by the binaries.

use clap::ValueEnum;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Install the global subscriber. `log_filter` takes an `EnvFilter`
/// directive string such as `"info,regatta_scheduler=debug"`.
pub fn init(log_filter: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter)
        .map_err(|e| Error::Unknown(format!("invalid log filter {log_filter:?}: {e}")))?;
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
    }
    .map_err(|e| Error::Unknown(format!("failed to set subscriber: {e}")))
}

/// Resolve once the process is asked to stop, on either ctrl-c or
/// SIGTERM. Every binary hands this to its server's graceful shutdown.
pub async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("SIGTERM handler registration failed");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, Router};
use clap::{crate_authors, crate_description, crate_version, Parser};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use regatta_api::metrics::Metrics;
use regatta_api::telemetry;
use regatta_client::Client;
use regatta_replication::{ReplicationManager, CONTROLLER_ID};

#[derive(Parser, Debug)]
#[command(
    name = "regatta-controller-manager",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// URL of the apiserver
    #[arg(short, long, default_value = "http://127.0.0.1:8080", env)]
    master: String,

    /// Listen on given port for health and metrics
    #[arg(short, long, default_value_t = 10252, env)]
    port: u16,

    /// Full resynchronization period in seconds
    #[arg(long, default_value_t = 10, env)]
    sync_period: u64,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,regatta_replication=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,
}

async fn metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to get metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format)?;

    let client = Arc::new(Client::new(&args.master)?);
    let controller_metrics = Metrics::new(&[CONTROLLER_ID]);
    let manager = ReplicationManager::new(
        client,
        controller_metrics.controller(CONTROLLER_ID),
    );

    let cancel = CancellationToken::new();
    let manager_cancel = cancel.clone();
    let sync_period = Duration::from_secs(args.sync_period);
    let manager_task =
        tokio::spawn(async move { manager.run(sync_period, manager_cancel).await });

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(controller_metrics);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!(msg = "serving health and metrics", port = args.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = manager_task.await;
    Ok(())
}

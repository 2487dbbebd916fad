use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, Router};
use clap::{crate_authors, crate_description, crate_version, Parser};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use regatta_api::metrics::Metrics;
use regatta_api::telemetry;
use regatta_client::Client;
use regatta_scheduler::{
    provider, BackoffTable, GenericScheduler, NodeLabelConfig, Scheduler, CONTROLLER_ID,
};

#[derive(Parser, Debug)]
#[command(
    name = "regatta-schedulerd",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// URL of the apiserver
    #[arg(short, long, default_value = "http://127.0.0.1:8080", env)]
    master: String,

    /// Listen on given port for health and metrics
    #[arg(short, long, default_value_t = 10251, env)]
    port: u16,

    /// Named algorithm provider selecting the active predicate and
    /// priority set
    #[arg(long, default_value = "default", env)]
    algorithm_provider: String,

    /// Label keys every candidate node must carry, comma separated
    #[arg(long, value_delimiter = ',', env)]
    node_labels: Vec<String>,

    /// Whether the configured node labels must be present (true) or
    /// absent (false)
    #[arg(long, default_value_t = true, env)]
    node_labels_presence: bool,

    /// Seed for the tie-break random source; defaults to entropy
    #[arg(long, env)]
    random_seed: Option<u64>,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,regatta_scheduler=debug"
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

    let node_labels = (!args.node_labels.is_empty()).then(|| NodeLabelConfig {
        labels: args.node_labels.clone(),
        presence: args.node_labels_presence,
    });
    let (predicates, priorities) = provider(&args.algorithm_provider, node_labels)
        .ok_or_else(|| anyhow::anyhow!("unknown algorithm provider {:?}", args.algorithm_provider))?;
    let rng = match args.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let client = Arc::new(Client::new(&args.master)?);
    let scheduler_metrics = Metrics::new(&[CONTROLLER_ID]);
    let scheduler = Arc::new(Scheduler::new(
        client,
        GenericScheduler::new(predicates, priorities, rng),
        BackoffTable::default(),
        scheduler_metrics.controller(CONTROLLER_ID),
    ));

    let cancel = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(scheduler_metrics);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!(msg = "serving health and metrics", port = args.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = scheduler_task.await;
    Ok(())
}

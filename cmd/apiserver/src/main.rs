use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::{crate_authors, crate_description, crate_version, Parser};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use regatta_api::telemetry;
use regatta_master::clients::{HttpNodeAgentClient, StaticCloudProvider};
use regatta_master::registry::PortalIpPool;
use regatta_master::{Master, MasterConfig};
use regatta_store::MemoryBackend;

#[derive(Parser, Debug)]
#[command(
    name = "regatta-apiserver",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u16,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,regatta_master=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// CIDR block portal IPs are assigned from
    #[arg(long, default_value = "10.0.0.0/24", env)]
    portal_net: String,

    /// Port the node agents listen on
    #[arg(long, default_value_t = 10250, env)]
    agent_port: u16,

    /// Probe node agents and hide unhealthy minions from get/list
    #[arg(long, default_value_t = false, env)]
    health_check_minions: bool,
}

fn parse_portal_net(cidr: &str) -> anyhow::Result<PortalIpPool> {
    let (base, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("portal net {cidr:?} is not a CIDR block"))?;
    let base: Ipv4Addr = base.parse()?;
    let prefix: u32 = prefix.parse()?;
    if prefix > 30 {
        anyhow::bail!("portal net {cidr:?} is too small");
    }
    // Skip the network address; leave the broadcast address out of the
    // range.
    let size = (1u32 << (32 - prefix)) - 2;
    let first = Ipv4Addr::from(u32::from(base) + 1);
    Ok(PortalIpPool::new(first, size))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format)?;

    let config = MasterConfig {
        portal_ip_pool: parse_portal_net(&args.portal_net)?,
        health_check_minions: args.health_check_minions,
        ..MasterConfig::default()
    };
    let backend = Arc::new(MemoryBackend::new());
    let agent = Arc::new(HttpNodeAgentClient::new(args.agent_port)?);
    let master = Master::new(backend, agent, Arc::new(StaticCloudProvider), config);

    let cancel = CancellationToken::new();
    let loops = master.spawn_control_loops(cancel.clone());

    let app = master.router();
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!(msg = "serving api", port = args.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    cancel.cancel();
    for task in loops {
        let _ = task.await;
    }
    Ok(())
}

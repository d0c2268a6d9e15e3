mod config;
mod errors;
mod instance;
mod mmdvm;
mod outgoing;
mod peer_stubs;
mod rptc;
mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use dmrswitch_bus::Bus;
use dmrswitch_control::PgControlRepo;
use dmrswitch_kv::MemoryKv;
use dmrswitch_media::{CallTracker, Hub, Parrot, SubscriptionManager};
use dmrswitch_metrics::{gateway::GatewayMetrics, MetricsConfig, MetricsServer};
use sqlx::postgres::PgPoolOptions;
use tokio::net::UdpSocket;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::instance::InstanceRegistry;
use crate::mmdvm::MmdvmServer;
use crate::session::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let metrics_cfg = MetricsConfig { listen: cfg.metrics_listen.clone(), namespace: "dmrswitch" };
    match MetricsServer::install(metrics_cfg) {
        Ok(server) => {
            tokio::spawn(async move {
                let _ = server.serve().await;
            });
        }
        Err(e) => error!(error = %e, "failed to install metrics exporter, continuing without it"),
    }
    let gateway_metrics = Arc::new(GatewayMetrics::new("dmrswitch"));

    let pool = PgPoolOptions::new().max_connections(32).connect(&cfg.database_url).await?;
    sqlx::migrate!("../control/migrations").run(&pool).await?;
    let repo: Arc<dyn dmrswitch_control::ControlRepo> = Arc::new(PgControlRepo::new(pool));

    let bus = Arc::new(Bus::new());
    let kv = Arc::new(MemoryKv::new());
    kv.spawn_sweeper(Duration::from_secs(30));

    let tracker = CallTracker::new(repo.clone(), bus.clone());
    let subs = SubscriptionManager::new(repo.clone(), bus.clone());
    let parrot = Parrot::new(kv.clone(), bus.clone(), tracker.clone());
    let hub = Hub::new(repo.clone(), bus.clone(), tracker, parrot, subs);

    let sessions = Arc::new(SessionStore::new(kv.clone()));

    let socket = Arc::new(UdpSocket::bind(cfg.mmdvm_addr()).await?);
    info!(addr = %socket.local_addr()?, "mmdvm server listening");

    outgoing::spawn_outgoing_writer(bus.clone(), sessions.clone(), socket.clone());

    let instance = Arc::new(InstanceRegistry::new(kv.clone()));
    instance.heartbeat_once().await;
    instance.spawn_heartbeat();
    info!(instance = %instance.id(), "instance registered");

    if cfg.openbridge_enabled {
        let bind = cfg.openbridge_addr();
        tokio::spawn(async move {
            if let Err(e) = peer_stubs::run_openbridge_stub(bind).await {
                error!(error = %e, "openbridge stub exited");
            }
        });
    }
    if cfg.ipsc_enabled {
        let bind = cfg.ipsc_addr();
        tokio::spawn(async move {
            if let Err(e) = peer_stubs::run_ipsc_stub(bind).await {
                error!(error = %e, "ipsc stub exited");
            }
        });
    }

    let server = MmdvmServer::new(socket, sessions, repo, hub, gateway_metrics);

    tokio::select! {
        r = server.run() => {
            if let Err(e) = r {
                error!(error = %e, "mmdvm server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Shutdown budget (§5): disconnect messages within 5s, then close.
    if !instance.peers_alive().await {
        let _ = tokio::time::timeout(Duration::from_secs(5), server.disconnect_all()).await;
    } else {
        info!("other instances still live, skipping MSTCL so sessions migrate");
    }
    instance.deregister().await;

    Ok(())
}

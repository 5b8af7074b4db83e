//! Authoritative remote store for local-first replicas.
//!
//! ```text
//! CRDT_REMOTE_ADDR=0.0.0.0:9090 CRDT_REMOTE_REPLICATION=state crdt-remote
//! ```

use crdt_replica::{AuthorityServer, Granularity, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CRDT_REMOTE_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(replication) = std::env::var("CRDT_REMOTE_REPLICATION") {
        config.granularity = replication.parse::<Granularity>()?;
    }

    let server = AuthorityServer::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            let hub = server.hub_stats();
            log::info!(
                "Shutting down: {} connections served, {} notifications sent, {} dropped",
                stats.total_connections,
                hub.notifications_sent,
                hub.notifications_dropped
            );
            Ok(())
        }
    }
}

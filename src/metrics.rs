use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::server::Server;

/// Initialize the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("cmd_duration_seconds".to_string()),
            &[
                0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ],
        )?
        .install()?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

/// Periodically refresh the per-collection gauges scrapers read.
pub async fn refresh_loop(server: Arc<Server>) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        metrics::gauge!("connected_clients")
            .set(server.connected_clients.load(std::sync::atomic::Ordering::SeqCst) as f64);
        metrics::gauge!("aof_size_bytes")
            .set(server.aof_size.load(std::sync::atomic::Ordering::SeqCst) as f64);

        let role = if server.config.read().following() {
            "follower"
        } else {
            "leader"
        };
        metrics::gauge!("replication_info", "role" => role).set(1.0);

        let db = server.db.read();
        for (key, col) in &db.collections {
            metrics::gauge!("collection_objects", "col" => key.to_string())
                .set(col.count() as f64);
            metrics::gauge!("collection_points", "col" => key.to_string())
                .set(col.point_count() as f64);
            metrics::gauge!("collection_weight_bytes", "col" => key.to_string())
                .set(col.weight() as f64);
        }
    }
}

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use common_metrics::setup_metrics_routes;
use envconfig::Envconfig;
use eyre::{Context, Result};
use health::HealthRegistry;
use rebalancer::config::Config;
use rebalancer::gateway::EtcdMetadataStoreGateway;
use rebalancer::instance_partitions::IdentityInstanceAssignmentDriver;
use rebalancer::strategy::StickyBalancedSegmentStrategy;
use rebalancer::RebalanceDriver;
use tracing::{error, info};

fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(|| ready("table rebalancer")))
        .route("/_readiness", get(|| ready("table rebalancer")))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// One-shot CLI: load config, connect to etcd, run a single rebalance,
/// print the `RebalanceResult` as JSON. There is no resident service
/// here and nothing to resume (§1 Non-goal (a)) — the caller (a cron, an
/// operator, a higher-level orchestrator) is responsible for retrying or
/// scheduling. The health/metrics endpoints exist only so a supervisor
/// can observe the process while a no-downtime rebalance sits in its
/// (potentially long) external-view convergence wait.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    let table_config = config
        .table_config()
        .map_err(|e| eyre::eyre!(e))
        .wrap_err("invalid table configuration")?;
    let rebalance_config = config.rebalance_config();

    let liveness = HealthRegistry::new("liveness");
    let rebalance_liveness = liveness
        .register(
            "rebalance".to_string(),
            Duration::from_secs(config.external_view_stabilization_max_wait_secs * 2),
        )
        .await;

    let bind = format!("{}:{}", config.host, config.port);
    let http_app = setup_metrics_routes(app(liveness));
    let http_server = tokio::spawn(listen(http_app, bind));

    info!(
        table = table_config.table_name_with_type,
        downtime = rebalance_config.downtime,
        dry_run = rebalance_config.dry_run,
        "connecting to etcd"
    );

    let store = coordination_store::EtcdStore::connect(coordination_store::StoreConfig {
        endpoints: config.etcd_endpoints(),
        prefix: config.etcd_prefix.clone(),
    })
    .await
    .wrap_err("failed to connect to etcd")?;

    let gateway = Arc::new(EtcdMetadataStoreGateway::new(store));
    let strategy = Arc::new(StickyBalancedSegmentStrategy);
    let instance_driver = Arc::new(IdentityInstanceAssignmentDriver);

    let driver = RebalanceDriver::new(gateway, strategy, instance_driver).with_ev_polling(
        Duration::from_secs(config.external_view_check_interval_secs),
        Duration::from_secs(config.external_view_stabilization_max_wait_secs),
    );

    let result = driver.rebalance(&table_config, &rebalance_config).await;
    rebalance_liveness.report_healthy().await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    http_server.abort();

    if result.status == rebalancer::model::RebalanceStatus::Failed {
        error!(table = table_config.table_name_with_type, message = %result.message, "rebalance failed");
        std::process::exit(1);
    }

    Ok(())
}

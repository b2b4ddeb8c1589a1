use std::sync::Arc;
use std::time::Duration;

use coordination_store::{EtcdStore, StoreConfig};
use rebalancer::gateway::EtcdMetadataStoreGateway;
use rebalancer::instance_partitions::IdentityInstanceAssignmentDriver;
use rebalancer::strategy::StickyBalancedSegmentStrategy;
use rebalancer::RebalanceDriver;

pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn test_store(test_name: &str) -> EtcdStore {
    let prefix = format!("/test-rebalancer-{}-{}/", test_name, uuid::Uuid::new_v4());
    let config = StoreConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        prefix,
    };
    EtcdStore::connect(config)
        .await
        .expect("failed to connect to etcd")
}

/// Compose a fully-qualified key the way `EtcdMetadataStoreGateway` does,
/// since `EtcdStore`'s own get/put take already-prefixed keys.
pub fn key(store: &EtcdStore, suffix: &str) -> String {
    format!("{}{}", store.prefix(), suffix)
}

pub fn test_driver(store: EtcdStore) -> RebalanceDriver {
    RebalanceDriver::new(
        Arc::new(EtcdMetadataStoreGateway::new(store)),
        Arc::new(StickyBalancedSegmentStrategy),
        Arc::new(IdentityInstanceAssignmentDriver),
    )
    .with_ev_polling(Duration::from_millis(50), Duration::from_secs(5))
}

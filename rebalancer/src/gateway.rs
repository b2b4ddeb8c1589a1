use async_trait::async_trait;
use coordination_store::{CasOutcome, EtcdStore};

use crate::error::Result;
use crate::model::{ExternalView, IdealState, InstanceConfig, InstancePartitions, InstancePartitionsType};

/// Versioned read/compare-and-set access to the cluster metadata store.
///
/// All reads are point reads; there is no caching layer. Failures other
/// than a version mismatch on `cas_ideal_state` are surfaced through
/// `Err` and are fatal to the current rebalance — they must never be
/// folded into a `CasOutcome::VersionMismatch`.
#[async_trait]
pub trait MetadataStoreGateway: Send + Sync {
    async fn read_ideal_state(&self, table: &str) -> Result<Option<IdealState>>;

    async fn cas_ideal_state(
        &self,
        table: &str,
        record: &IdealState,
        expected_version: i64,
    ) -> Result<CasOutcome>;

    async fn read_external_view(&self, table: &str) -> Result<Option<ExternalView>>;

    async fn read_instance_configs(&self) -> Result<Vec<InstanceConfig>>;

    async fn persist_instance_partitions(&self, ip: &InstancePartitions) -> Result<()>;

    async fn remove_instance_partitions(&self, name: &str) -> Result<()>;

    async fn fetch_instance_partitions(
        &self,
        table: &str,
        partition_type: InstancePartitionsType,
    ) -> Result<Option<InstancePartitions>>;
}

/// etcd-backed `MetadataStoreGateway`.
///
/// Key layout under the store's configured prefix:
/// `idealStates/{table}`, `externalView/{table}`, `instanceConfigs/{id}`,
/// `instancePartitions/{name}`.
pub struct EtcdMetadataStoreGateway {
    store: EtcdStore,
}

impl EtcdMetadataStoreGateway {
    pub fn new(store: EtcdStore) -> Self {
        Self { store }
    }

    fn ideal_state_key(&self, table: &str) -> String {
        format!("{}idealStates/{table}", self.store.prefix())
    }

    fn external_view_key(&self, table: &str) -> String {
        format!("{}externalView/{table}", self.store.prefix())
    }

    fn instance_configs_prefix(&self) -> String {
        format!("{}instanceConfigs/", self.store.prefix())
    }

    fn instance_partitions_key(&self, name: &str) -> String {
        format!("{}instancePartitions/{name}", self.store.prefix())
    }
}

fn instance_partitions_name(table: &str, partition_type: InstancePartitionsType) -> String {
    format!("{table}_{partition_type}")
}

#[async_trait]
impl MetadataStoreGateway for EtcdMetadataStoreGateway {
    async fn read_ideal_state(&self, table: &str) -> Result<Option<IdealState>> {
        let key = self.ideal_state_key(table);
        match self.store.get_versioned::<IdealState>(&key).await? {
            Some((mut record, version)) => {
                record.version = version;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn cas_ideal_state(
        &self,
        table: &str,
        record: &IdealState,
        expected_version: i64,
    ) -> Result<CasOutcome> {
        let key = self.ideal_state_key(table);
        Ok(self.store.cas_put(&key, record, expected_version).await?)
    }

    async fn read_external_view(&self, table: &str) -> Result<Option<ExternalView>> {
        let key = self.external_view_key(table);
        Ok(self.store.get::<ExternalView>(&key).await?)
    }

    async fn read_instance_configs(&self) -> Result<Vec<InstanceConfig>> {
        Ok(self
            .store
            .list::<InstanceConfig>(&self.instance_configs_prefix())
            .await?)
    }

    async fn persist_instance_partitions(&self, ip: &InstancePartitions) -> Result<()> {
        let key = self.instance_partitions_key(&ip.name);
        Ok(self.store.put(&key, ip, None).await?)
    }

    async fn remove_instance_partitions(&self, name: &str) -> Result<()> {
        let key = self.instance_partitions_key(name);
        Ok(self.store.delete(&key).await?)
    }

    async fn fetch_instance_partitions(
        &self,
        table: &str,
        partition_type: InstancePartitionsType,
    ) -> Result<Option<InstancePartitions>> {
        let name = instance_partitions_name(table, partition_type);
        let key = self.instance_partitions_key(&name);
        Ok(self.store.get::<InstancePartitions>(&key).await?)
    }
}

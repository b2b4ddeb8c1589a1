use std::collections::BTreeMap;

use tracing::info;

use crate::error::Result;
use crate::gateway::MetadataStoreGateway;
use crate::model::{InstanceConfig, InstancePartitions, InstancePartitionsType, RebalanceConfig, TableConfig};

/// External collaborator interface (§4.8): produces an `InstancePartitions`
/// for one partition type from the pool of instance configs. Pure
/// function of its inputs; real pool/fault-domain selection is out of
/// scope (§1).
pub trait InstanceAssignmentDriver: Send + Sync {
    fn assign(
        &self,
        table_config: &TableConfig,
        partition_type: InstancePartitionsType,
        instance_configs: &[InstanceConfig],
    ) -> InstancePartitions;
}

/// Assigns every enabled instance to a single replica group. Sufficient
/// for tests and for tables that don't configure fault-domain-aware
/// pooling; real pool/fault-domain selection is a separate collaborator
/// per §1.
pub struct IdentityInstanceAssignmentDriver;

impl InstanceAssignmentDriver for IdentityInstanceAssignmentDriver {
    fn assign(
        &self,
        table_config: &TableConfig,
        partition_type: InstancePartitionsType,
        instance_configs: &[InstanceConfig],
    ) -> InstancePartitions {
        let instances: Vec<String> = instance_configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.instance_id.clone())
            .collect();

        InstancePartitions {
            name: instance_partitions_name(table_config, partition_type),
            partition_type,
            partitions: BTreeMap::from([("0".to_string(), instances)]),
        }
    }
}

fn instance_partitions_name(table_config: &TableConfig, partition_type: InstancePartitionsType) -> String {
    format!("{}_{}", table_config.table_name_with_type, partition_type)
}

/// Resolve the `InstancePartitions` for every partition type relevant to
/// `table_config` (§4.2), in deterministic declaration order.
pub async fn resolve_instance_partitions_map(
    gateway: &dyn MetadataStoreGateway,
    driver: &dyn InstanceAssignmentDriver,
    table_config: &TableConfig,
    rebalance_config: &RebalanceConfig,
) -> Result<BTreeMap<InstancePartitionsType, InstancePartitions>> {
    let mut map = BTreeMap::new();
    for partition_type in table_config.relevant_partition_types() {
        let ip = resolve_one(gateway, driver, table_config, rebalance_config, partition_type).await?;
        map.insert(partition_type, ip);
    }
    Ok(map)
}

async fn resolve_one(
    gateway: &dyn MetadataStoreGateway,
    driver: &dyn InstanceAssignmentDriver,
    table_config: &TableConfig,
    rebalance_config: &RebalanceConfig,
    partition_type: InstancePartitionsType,
) -> Result<InstancePartitions> {
    if rebalance_config.reassign_instances {
        let policy_allows = table_config
            .reassignable_partition_types
            .contains(&partition_type);

        if policy_allows {
            let instance_configs = gateway.read_instance_configs().await?;
            let ip = driver.assign(table_config, partition_type, &instance_configs);
            if !rebalance_config.dry_run {
                gateway.persist_instance_partitions(&ip).await?;
            }
            info!(
                table = table_config.table_name_with_type,
                %partition_type, "recomputed and persisted instance partitions"
            );
            Ok(ip)
        } else {
            let instance_configs = gateway.read_instance_configs().await?;
            let ip = driver.assign(table_config, partition_type, &instance_configs);
            if !rebalance_config.dry_run {
                gateway.remove_instance_partitions(&ip.name).await?;
            }
            info!(
                table = table_config.table_name_with_type,
                %partition_type, "policy disallows reassignment, cleared stale custom partitions"
            );
            Ok(ip)
        }
    } else {
        match gateway
            .fetch_instance_partitions(&table_config.table_name_with_type, partition_type)
            .await?
        {
            Some(ip) => Ok(ip),
            None => {
                let instance_configs = gateway.read_instance_configs().await?;
                Ok(driver.assign(table_config, partition_type, &instance_configs))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_driver_skips_disabled_instances() {
        let config = TableConfig {
            table_name_with_type: "t_OFFLINE".into(),
            table_type: crate::model::TableType::Offline,
            high_level_consumer: false,
            replication: 1,
            reassignable_partition_types: vec![InstancePartitionsType::Offline],
        };
        let instances = vec![
            InstanceConfig {
                instance_id: "i1".into(),
                enabled: true,
                pool: None,
            },
            InstanceConfig {
                instance_id: "i2".into(),
                enabled: false,
                pool: None,
            },
        ];
        let driver = IdentityInstanceAssignmentDriver;
        let ip = driver.assign(&config, InstancePartitionsType::Offline, &instances);
        assert_eq!(ip.all_instances(), vec!["i1".to_string()]);
        assert_eq!(ip.name, "t_OFFLINE_OFFLINE");
    }
}

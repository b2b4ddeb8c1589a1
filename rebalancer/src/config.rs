use envconfig::Envconfig;

use crate::model::{InstancePartitionsType, RebalanceConfig, TableConfig, TableType};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3404")]
    pub port: u16,

    #[envconfig(from = "ETCD_ENDPOINTS", default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    #[envconfig(from = "ETCD_PREFIX", default = "/table-rebalancer/")]
    pub etcd_prefix: String,

    #[envconfig(from = "EXTERNAL_VIEW_CHECK_INTERVAL_SECS", default = "1")]
    pub external_view_check_interval_secs: u64,

    #[envconfig(from = "EXTERNAL_VIEW_STABILIZATION_MAX_WAIT_SECS", default = "3600")]
    pub external_view_stabilization_max_wait_secs: u64,

    #[envconfig(from = "TABLE_NAME_WITH_TYPE")]
    pub table_name_with_type: String,

    #[envconfig(from = "TABLE_TYPE", default = "OFFLINE")]
    pub table_type: String,

    #[envconfig(from = "HIGH_LEVEL_CONSUMER", default = "false")]
    pub high_level_consumer: bool,

    #[envconfig(from = "REPLICATION", default = "1")]
    pub replication: u32,

    #[envconfig(from = "DRY_RUN", default = "false")]
    pub dry_run: bool,

    #[envconfig(from = "REASSIGN_INSTANCES", default = "false")]
    pub reassign_instances: bool,

    #[envconfig(from = "INCLUDE_CONSUMING", default = "false")]
    pub include_consuming: bool,

    #[envconfig(from = "DOWNTIME", default = "false")]
    pub downtime: bool,

    #[envconfig(from = "MIN_REPLICAS_TO_KEEP_UP_FOR_NO_DOWNTIME", default = "1")]
    pub min_replicas_to_keep_up_for_no_downtime: i32,

    #[envconfig(from = "BEST_EFFORTS", default = "false")]
    pub best_efforts: bool,
}

impl Config {
    pub fn etcd_endpoints(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .collect()
    }

    pub fn table_config(&self) -> Result<TableConfig, String> {
        let table_type = match self.table_type.as_str() {
            "OFFLINE" => TableType::Offline,
            "REALTIME" => TableType::Realtime,
            other => return Err(format!("unknown TABLE_TYPE {other:?}, expected OFFLINE or REALTIME")),
        };

        let reassignable_partition_types = match table_type {
            TableType::Offline => vec![InstancePartitionsType::Offline],
            TableType::Realtime => vec![
                InstancePartitionsType::Consuming,
                InstancePartitionsType::Completed,
            ],
        };

        Ok(TableConfig {
            table_name_with_type: self.table_name_with_type.clone(),
            table_type,
            high_level_consumer: self.high_level_consumer,
            replication: self.replication,
            reassignable_partition_types,
        })
    }

    pub fn rebalance_config(&self) -> RebalanceConfig {
        RebalanceConfig {
            dry_run: self.dry_run,
            reassign_instances: self.reassign_instances,
            include_consuming: self.include_consuming,
            downtime: self.downtime,
            min_replicas_to_keep_up_for_no_downtime: self.min_replicas_to_keep_up_for_no_downtime,
            best_efforts: self.best_efforts,
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Replica state of a single segment on a single instance.
///
/// Only `Online` and `Consuming` count as available. `Offline` in an
/// `IdealState` is a deliberate no-op assignment, skipped when diffing
/// against an `ExternalView`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentState {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "CONSUMING")]
    Consuming,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "DROPPED")]
    Dropped,
}

impl SegmentState {
    pub fn is_available(self) -> bool {
        matches!(self, SegmentState::Online | SegmentState::Consuming)
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentState::Online => "ONLINE",
            SegmentState::Consuming => "CONSUMING",
            SegmentState::Offline => "OFFLINE",
            SegmentState::Error => "ERROR",
            SegmentState::Dropped => "DROPPED",
        };
        f.write_str(s)
    }
}

/// `instance_id -> replica_state` for a single segment.
pub type InstanceStateMap = BTreeMap<String, SegmentState>;

/// `segment_name -> InstanceStateMap`. Iteration is always in sorted
/// key order, so diffing and logging are reproducible without an
/// extra sort step.
pub type Assignment = BTreeMap<String, InstanceStateMap>;

/// Declared partition type an `InstancePartitions` object applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstancePartitionsType {
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "CONSUMING")]
    Consuming,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl fmt::Display for InstancePartitionsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstancePartitionsType::Offline => "OFFLINE",
            InstancePartitionsType::Consuming => "CONSUMING",
            InstancePartitionsType::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// Opaque instance pool used by segment-assignment strategies, keyed
/// by replica group (e.g. `"0"`, `"1"`, ...) to a list of instance ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePartitions {
    pub name: String,
    pub partition_type: InstancePartitionsType,
    pub partitions: BTreeMap<String, Vec<String>>,
}

impl InstancePartitions {
    /// Every instance id referenced by any replica group, deduplicated.
    pub fn all_instances(&self) -> Vec<String> {
        let mut instances: Vec<String> = self
            .partitions
            .values()
            .flatten()
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        instances.sort();
        instances
    }
}

/// A server process eligible to host segment replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub enabled: bool,
    pub pool: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableType {
    Offline,
    Realtime,
}

/// Declarative inputs describing the table being rebalanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub table_name_with_type: String,
    pub table_type: TableType,
    /// A realtime table configured with the legacy high-level consumer
    /// model cannot be rebalanced (see global invariant 4).
    pub high_level_consumer: bool,
    pub replication: u32,
    /// Partition types for which `reassign_instances` should recompute
    /// (rather than fetch/default) the instance pool.
    pub reassignable_partition_types: Vec<InstancePartitionsType>,
}

impl TableConfig {
    /// Partition types relevant to this table's type: `{OFFLINE}` for
    /// offline tables, `{CONSUMING, COMPLETED}` for realtime tables.
    pub fn relevant_partition_types(&self) -> Vec<InstancePartitionsType> {
        match self.table_type {
            TableType::Offline => vec![InstancePartitionsType::Offline],
            TableType::Realtime => vec![
                InstancePartitionsType::Consuming,
                InstancePartitionsType::Completed,
            ],
        }
    }
}

/// `idealStates/{table}`: the authoritative desired assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdealState {
    pub version: i64,
    pub enabled: bool,
    pub assignment: Assignment,
    pub num_partitions: u32,
    pub replicas: u32,
}

/// `externalView/{table}`: the observed assignment. Unversioned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalView {
    pub assignment: Assignment,
}

/// Recognized `RebalanceConfig` options (§3 of the specification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub dry_run: bool,
    pub reassign_instances: bool,
    pub include_consuming: bool,
    pub downtime: bool,
    pub min_replicas_to_keep_up_for_no_downtime: i32,
    pub best_efforts: bool,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            reassign_instances: false,
            include_consuming: false,
            downtime: false,
            min_replicas_to_keep_up_for_no_downtime: 1,
            best_efforts: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceStatus {
    Done,
    NoOp,
    Failed,
}

/// Outcome of a `rebalance()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceResult {
    pub status: RebalanceStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_partitions_map: Option<BTreeMap<InstancePartitionsType, InstancePartitions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_assignment: Option<Assignment>,
}

impl RebalanceResult {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: RebalanceStatus::Done,
            message: message.into(),
            instance_partitions_map: None,
            target_assignment: None,
        }
    }

    pub fn no_op(message: impl Into<String>) -> Self {
        Self {
            status: RebalanceStatus::NoOp,
            message: message.into(),
            instance_partitions_map: None,
            target_assignment: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RebalanceStatus::Failed,
            message: message.into(),
            instance_partitions_map: None,
            target_assignment: None,
        }
    }

    pub fn with_target_assignment(mut self, assignment: Assignment) -> Self {
        self.target_assignment = Some(assignment);
        self
    }

    pub fn with_instance_partitions_map(
        mut self,
        map: BTreeMap<InstancePartitionsType, InstancePartitions>,
    ) -> Self {
        self.instance_partitions_map = Some(map);
        self
    }
}

/// The number of replicas present for a segment, used to derive
/// `min_available_replicas`. All segments in a well-formed assignment
/// must share the same replica count (§3 invariant; validated in
/// `driver::validate_uniform_replica_count`).
pub fn segment_replica_count(assignment: &Assignment) -> Option<usize> {
    assignment.values().next().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_state_wire_format() {
        assert_eq!(
            serde_json::to_string(&SegmentState::Online).unwrap(),
            "\"ONLINE\""
        );
        assert_eq!(
            serde_json::to_string(&SegmentState::Consuming).unwrap(),
            "\"CONSUMING\""
        );
        assert_eq!(
            serde_json::from_str::<SegmentState>("\"ERROR\"").unwrap(),
            SegmentState::Error
        );
    }

    #[test]
    fn availability() {
        assert!(SegmentState::Online.is_available());
        assert!(SegmentState::Consuming.is_available());
        assert!(!SegmentState::Offline.is_available());
        assert!(!SegmentState::Error.is_available());
        assert!(!SegmentState::Dropped.is_available());
    }

    #[test]
    fn relevant_partition_types() {
        let offline = TableConfig {
            table_name_with_type: "foo_OFFLINE".into(),
            table_type: TableType::Offline,
            high_level_consumer: false,
            replication: 2,
            reassignable_partition_types: vec![],
        };
        assert_eq!(
            offline.relevant_partition_types(),
            vec![InstancePartitionsType::Offline]
        );

        let realtime = TableConfig {
            table_type: TableType::Realtime,
            ..offline
        };
        assert_eq!(
            realtime.relevant_partition_types(),
            vec![
                InstancePartitionsType::Consuming,
                InstancePartitionsType::Completed
            ]
        );
    }
}

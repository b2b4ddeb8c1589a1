use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::model::{
    Assignment, InstancePartitions, InstancePartitionsType, InstanceStateMap, SegmentState,
    TableConfig, TableType,
};

/// External collaborator interface (§4.3 of the specification).
///
/// Implementations decide *how* segments map to instances; the
/// rebalancer only requires that the result is a pure function of its
/// inputs, uses a replica count equal to `config.replication`, and
/// draws its instance set from the union of `instance_partitions_map`.
pub trait SegmentAssignmentStrategy: Send + Sync {
    fn rebalance_table(
        &self,
        current_assignment: &Assignment,
        instance_partitions_map: &BTreeMap<InstancePartitionsType, InstancePartitions>,
        config: &TableConfig,
        include_consuming: bool,
    ) -> Result<Assignment>;
}

/// Reference strategy, adapted from the corpus's sticky-balanced
/// partition assigner: keeps as many existing (instance, state) pairs
/// per segment as are still eligible, then fills remaining replica
/// slots from the eligible instance pool in round-robin order to
/// minimize movement while keeping load roughly even.
pub struct StickyBalancedSegmentStrategy;

impl SegmentAssignmentStrategy for StickyBalancedSegmentStrategy {
    fn rebalance_table(
        &self,
        current_assignment: &Assignment,
        instance_partitions_map: &BTreeMap<InstancePartitionsType, InstancePartitions>,
        config: &TableConfig,
        include_consuming: bool,
    ) -> Result<Assignment> {
        let eligible = eligible_instances(config, instance_partitions_map);
        if eligible.is_empty() && !current_assignment.is_empty() {
            return Err(Error::Strategy(
                "no eligible instances in instance_partitions_map".to_string(),
            ));
        }
        let eligible_set: BTreeSet<&String> = eligible.iter().collect();
        let replication = config.replication as usize;
        let fill_state = default_fill_state(config);
        // §3: "Consider CONSUMING replicas for realtime tables" — when
        // the caller didn't opt in, a CONSUMING replica isn't treated as
        // settled and is dropped from `kept` so it gets re-filled below.
        let drop_consuming =
            config.table_type == TableType::Realtime && !include_consuming;

        let mut target = Assignment::new();
        for (segment_index, (segment, current_states)) in current_assignment.iter().enumerate() {
            let mut kept: Vec<(String, SegmentState)> = current_states
                .iter()
                .filter(|(instance, _)| eligible_set.contains(instance))
                .filter(|(_, state)| !(drop_consuming && **state == SegmentState::Consuming))
                .map(|(instance, state)| (instance.clone(), *state))
                .collect();
            kept.sort_by(|a, b| a.0.cmp(&b.0));
            kept.truncate(replication);

            let mut next: InstanceStateMap = kept.into_iter().collect();

            if !eligible.is_empty() {
                let offset = segment_index % eligible.len();
                let mut cursor = offset;
                while next.len() < replication {
                    let candidate = &eligible[cursor];
                    if !next.contains_key(candidate) {
                        next.insert(candidate.clone(), fill_state);
                    }
                    cursor = (cursor + 1) % eligible.len();
                    if cursor == offset && next.len() < replication {
                        // Exhausted the pool without reaching the target
                        // replica count; fewer eligible instances than
                        // replicas requested.
                        break;
                    }
                }
            }

            target.insert(segment.clone(), next);
        }

        Ok(target)
    }
}

fn eligible_instances(
    config: &TableConfig,
    instance_partitions_map: &BTreeMap<InstancePartitionsType, InstancePartitions>,
) -> Vec<String> {
    let mut instances = BTreeSet::new();
    for partition_type in config.relevant_partition_types() {
        if let Some(ip) = instance_partitions_map.get(&partition_type) {
            instances.extend(ip.all_instances());
        }
    }
    instances.into_iter().collect()
}

fn default_fill_state(config: &TableConfig) -> SegmentState {
    match config.table_type {
        TableType::Realtime => SegmentState::Consuming,
        TableType::Offline => SegmentState::Online,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstancePartitionsType as PT;

    fn offline_config(replication: u32) -> TableConfig {
        TableConfig {
            table_name_with_type: "t_OFFLINE".into(),
            table_type: TableType::Offline,
            high_level_consumer: false,
            replication,
            reassignable_partition_types: vec![PT::Offline],
        }
    }

    fn ip(instances: &[&str]) -> InstancePartitions {
        InstancePartitions {
            name: "t_OFFLINE_OFFLINE".into(),
            partition_type: PT::Offline,
            partitions: BTreeMap::from([(
                "0".to_string(),
                instances.iter().map(|s| s.to_string()).collect(),
            )]),
        }
    }

    #[test]
    fn keeps_existing_when_still_eligible() {
        let config = offline_config(2);
        let mut current = Assignment::new();
        current.insert(
            "seg0".into(),
            InstanceStateMap::from([
                ("i1".to_string(), SegmentState::Online),
                ("i2".to_string(), SegmentState::Online),
            ]),
        );
        let mut map = BTreeMap::new();
        map.insert(PT::Offline, ip(&["i1", "i2", "i3"]));

        let strategy = StickyBalancedSegmentStrategy;
        let target = strategy
            .rebalance_table(&current, &map, &config, false)
            .unwrap();
        assert_eq!(target["seg0"], current["seg0"]);
    }

    #[test]
    fn drops_ineligible_and_fills_from_pool() {
        let config = offline_config(2);
        let mut current = Assignment::new();
        current.insert(
            "seg0".into(),
            InstanceStateMap::from([
                ("dead".to_string(), SegmentState::Online),
                ("i1".to_string(), SegmentState::Online),
            ]),
        );
        let mut map = BTreeMap::new();
        map.insert(PT::Offline, ip(&["i1", "i2"]));

        let strategy = StickyBalancedSegmentStrategy;
        let target = strategy
            .rebalance_table(&current, &map, &config, false)
            .unwrap();
        assert_eq!(target["seg0"].len(), 2);
        assert!(target["seg0"].contains_key("i1"));
        assert!(!target["seg0"].contains_key("dead"));
    }

    #[test]
    fn realtime_fill_state_is_consuming() {
        let config = TableConfig {
            table_type: TableType::Realtime,
            reassignable_partition_types: vec![PT::Completed],
            ..offline_config(1)
        };
        let mut current = Assignment::new();
        current.insert("seg0".into(), InstanceStateMap::new());
        let mut map = BTreeMap::new();
        map.insert(
            PT::Completed,
            InstancePartitions {
                name: "t_REALTIME_COMPLETED".into(),
                partition_type: PT::Completed,
                partitions: BTreeMap::from([("0".to_string(), vec!["i1".to_string()])]),
            },
        );

        let strategy = StickyBalancedSegmentStrategy;
        let target = strategy
            .rebalance_table(&current, &map, &config, false)
            .unwrap();
        assert_eq!(target["seg0"]["i1"], SegmentState::Consuming);
    }

    #[test]
    fn consuming_replicas_dropped_for_realtime_when_not_included() {
        // i2 sits second in round-robin fill order (offset 0 starts at
        // i1), so if the CONSUMING replica on i2 is dropped from `kept`
        // it gets refilled onto a different instance than if it were kept.
        let config = TableConfig {
            table_type: TableType::Realtime,
            reassignable_partition_types: vec![PT::Completed],
            ..offline_config(1)
        };
        let mut current = Assignment::new();
        current.insert(
            "seg0".into(),
            InstanceStateMap::from([("i2".to_string(), SegmentState::Consuming)]),
        );
        let mut map = BTreeMap::new();
        map.insert(
            PT::Completed,
            InstancePartitions {
                name: "t_REALTIME_COMPLETED".into(),
                partition_type: PT::Completed,
                partitions: BTreeMap::from([(
                    "0".to_string(),
                    vec!["i1".to_string(), "i2".to_string()],
                )]),
            },
        );

        let strategy = StickyBalancedSegmentStrategy;

        let target_included = strategy
            .rebalance_table(&current, &map, &config, true)
            .unwrap();
        assert_eq!(target_included["seg0"]["i2"], SegmentState::Consuming);

        let target_excluded = strategy
            .rebalance_table(&current, &map, &config, false)
            .unwrap();
        assert!(
            !target_excluded["seg0"].contains_key("i2"),
            "a CONSUMING replica should not be trivially kept when include_consuming is false"
        );
        assert_eq!(target_excluded["seg0"]["i1"], SegmentState::Consuming);
    }

    #[test]
    fn no_eligible_instances_for_nonempty_assignment_is_fatal() {
        let config = offline_config(1);
        let mut current = Assignment::new();
        current.insert("seg0".into(), InstanceStateMap::new());
        let map = BTreeMap::new();

        let strategy = StickyBalancedSegmentStrategy;
        assert!(strategy
            .rebalance_table(&current, &map, &config, false)
            .is_err());
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use coordination_store::CasOutcome;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::ev_waiter::{
    wait_for_external_view_to_converge, EXTERNAL_VIEW_CHECK_INTERVAL,
    EXTERNAL_VIEW_STABILIZATION_MAX_WAIT,
};
use crate::gateway::MetadataStoreGateway;
use crate::instance_partitions::{resolve_instance_partitions_map, InstanceAssignmentDriver};
use crate::model::{
    Assignment, IdealState, InstancePartitions, InstancePartitionsType, RebalanceConfig,
    RebalanceResult, TableConfig, TableType,
};
use crate::step_planner::{effective_min_available_replicas, get_next_assignment};
use crate::strategy::SegmentAssignmentStrategy;

use std::time::Duration;

/// Orchestrates the Metadata Store Gateway, Instance Partitions Resolver,
/// Segment Assignment Strategy, Step Planner, and Convergence Checker
/// to drive one table's `IdealState` toward a computed target (§4.6).
///
/// Holds no state across calls; everything it needs for a single
/// rebalance lives in the method's locals, per §3's lifecycle note.
pub struct RebalanceDriver {
    gateway: Arc<dyn MetadataStoreGateway>,
    strategy: Arc<dyn SegmentAssignmentStrategy>,
    instance_driver: Arc<dyn InstanceAssignmentDriver>,
    ev_check_interval: Duration,
    ev_max_wait: Duration,
}

impl RebalanceDriver {
    pub fn new(
        gateway: Arc<dyn MetadataStoreGateway>,
        strategy: Arc<dyn SegmentAssignmentStrategy>,
        instance_driver: Arc<dyn InstanceAssignmentDriver>,
    ) -> Self {
        Self {
            gateway,
            strategy,
            instance_driver,
            ev_check_interval: EXTERNAL_VIEW_CHECK_INTERVAL,
            ev_max_wait: EXTERNAL_VIEW_STABILIZATION_MAX_WAIT,
        }
    }

    pub fn with_ev_polling(mut self, check_interval: Duration, max_wait: Duration) -> Self {
        self.ev_check_interval = check_interval;
        self.ev_max_wait = max_wait;
        self
    }

    /// Entry point (§6). Never panics and never leaves a partially
    /// written CAS in flight on the way out; any fatal error surfaces
    /// as `RebalanceResult::Failed` rather than propagating.
    pub async fn rebalance(
        &self,
        table_config: &TableConfig,
        rebalance_config: &RebalanceConfig,
    ) -> RebalanceResult {
        let labels = [("table", table_config.table_name_with_type.clone())];
        let result = match self.rebalance_inner(table_config, rebalance_config).await {
            Ok(result) => result,
            Err(e) => {
                error!(table = table_config.table_name_with_type, error = %e, "rebalance failed");
                RebalanceResult::failed(e.to_string())
            }
        };
        metrics::counter!(
            "rebalancer_runs_total",
            &[("table", labels[0].1.clone()), ("status", format!("{:?}", result.status))]
        )
        .increment(1);
        result
    }

    async fn rebalance_inner(
        &self,
        table_config: &TableConfig,
        rebalance_config: &RebalanceConfig,
    ) -> Result<RebalanceResult> {
        let table_name = &table_config.table_name_with_type;
        info!(table = table_name, "starting rebalance");

        if table_config.table_type == TableType::Realtime && table_config.high_level_consumer {
            return Ok(RebalanceResult::failed(
                "cannot rebalance a realtime table using the high-level consumer model",
            ));
        }

        let Some(ideal_state) = self.gateway.read_ideal_state(table_name).await? else {
            return Ok(RebalanceResult::failed(format!(
                "ideal state for table {table_name} not found"
            )));
        };

        if !ideal_state.enabled && !rebalance_config.downtime {
            return Ok(RebalanceResult::failed(
                "Cannot rebalance disabled table without downtime",
            ));
        }

        validate_uniform_replica_count(table_name, &ideal_state.assignment)?;

        let instance_partitions_map = resolve_instance_partitions_map(
            self.gateway.as_ref(),
            self.instance_driver.as_ref(),
            table_config,
            rebalance_config,
        )
        .await?;

        let target_assignment = self.strategy.rebalance_table(
            &ideal_state.assignment,
            &instance_partitions_map,
            table_config,
            rebalance_config.include_consuming,
        )?;
        validate_uniform_replica_count(table_name, &target_assignment)?;

        if ideal_state.assignment == target_assignment {
            return Ok(if rebalance_config.reassign_instances {
                info!(table = table_name, "already balanced, instances reassigned");
                RebalanceResult::done("Instance reassigned; table already balanced")
                    .with_target_assignment(target_assignment)
                    .with_instance_partitions_map(instance_partitions_map)
            } else {
                info!(table = table_name, "already balanced, no-op");
                RebalanceResult::no_op("Table is already balanced")
            });
        }

        if rebalance_config.dry_run {
            info!(table = table_name, "dry-run mode, not mutating the store");
            return Ok(RebalanceResult::done("Dry-run mode")
                .with_target_assignment(target_assignment)
                .with_instance_partitions_map(instance_partitions_map));
        }

        if rebalance_config.downtime {
            Ok(self
                .run_downtime_loop(
                    table_name,
                    ideal_state,
                    target_assignment,
                    instance_partitions_map,
                    table_config,
                    rebalance_config,
                )
                .await)
        } else {
            Ok(self
                .run_no_downtime_loop(
                    table_name,
                    ideal_state,
                    target_assignment,
                    instance_partitions_map,
                    table_config,
                    rebalance_config,
                )
                .await)
        }
    }

    /// One-shot replace of IS with no availability guard, retried across
    /// CAS version mismatches (§4.6 downtime loop). Since segment
    /// assignment is a pure function of `current`/`instance_partitions_map`,
    /// a stale read just recomputes the same target when nothing else
    /// changed, and a genuinely different one when it did.
    // TODO: retries are unbounded here; a persistently contended table
    // just keeps re-reading and re-planning forever. A retry budget
    // would need a concrete number this spec doesn't provide.
    async fn run_downtime_loop(
        &self,
        table_name: &str,
        mut ideal_state: IdealState,
        mut target_assignment: Assignment,
        instance_partitions_map: BTreeMap<InstancePartitionsType, InstancePartitions>,
        table_config: &TableConfig,
        rebalance_config: &RebalanceConfig,
    ) -> RebalanceResult {
        loop {
            let record = IdealState {
                version: ideal_state.version,
                enabled: ideal_state.enabled,
                assignment: target_assignment.clone(),
                num_partitions: ideal_state.num_partitions,
                replicas: ideal_state.replicas,
            };

            let cas_result = self
                .gateway
                .cas_ideal_state(table_name, &record, ideal_state.version)
                .await;

            match cas_result {
                Ok(CasOutcome::Applied) => {
                    info!(table = table_name, "downtime rebalance applied");
                    return RebalanceResult::done("Downtime rebalance complete")
                        .with_target_assignment(target_assignment)
                        .with_instance_partitions_map(instance_partitions_map);
                }
                Ok(CasOutcome::VersionMismatch) => {
                    metrics::counter!("rebalancer_cas_retries_total", &[("table", table_name.to_string())])
                        .increment(1);
                    warn!(table = table_name, "CAS version mismatch, re-reading and re-planning");
                    let fresh = match self.gateway.read_ideal_state(table_name).await {
                        Ok(Some(fresh)) => fresh,
                        Ok(None) => {
                            return RebalanceResult::failed(format!(
                                "ideal state for table {table_name} disappeared mid-rebalance"
                            ))
                            .with_target_assignment(target_assignment);
                        }
                        Err(e) => {
                            return RebalanceResult::failed(e.to_string())
                                .with_target_assignment(target_assignment);
                        }
                    };
                    // Strategy is a pure function; recompute against the
                    // fresh current assignment so the retry reflects any
                    // concurrent change rather than blind-writing a
                    // stale target.
                    target_assignment = match self.strategy.rebalance_table(
                        &fresh.assignment,
                        &instance_partitions_map,
                        table_config,
                        rebalance_config.include_consuming,
                    ) {
                        Ok(t) => t,
                        Err(e) => {
                            return RebalanceResult::failed(e.to_string())
                                .with_target_assignment(target_assignment);
                        }
                    };
                    ideal_state = fresh;
                }
                Err(e) => {
                    return RebalanceResult::failed(e.to_string())
                        .with_target_assignment(target_assignment);
                }
            }
        }
    }

    /// Repeatedly waits for EV to converge, re-plans against whatever IS
    /// version is current, and advances one CAS-guarded step at a time
    /// (§4.6 no-downtime loop). Terminates once `current == target`.
    async fn run_no_downtime_loop(
        &self,
        table_name: &str,
        initial_ideal_state: IdealState,
        mut target_assignment: Assignment,
        instance_partitions_map: BTreeMap<InstancePartitionsType, InstancePartitions>,
        table_config: &TableConfig,
        rebalance_config: &RebalanceConfig,
    ) -> RebalanceResult {
        let mut current = initial_ideal_state.assignment.clone();
        let mut expected_version = initial_ideal_state.version;
        let mut ideal_state = initial_ideal_state;
        let mut iterations: u64 = 0;

        loop {
            let waited = match wait_for_external_view_to_converge(
                self.gateway.as_ref(),
                table_name,
                rebalance_config.best_efforts,
                self.ev_check_interval,
                self.ev_max_wait,
            )
            .await
            {
                Ok(waited) => waited,
                Err(e) => {
                    return RebalanceResult::failed(e.to_string())
                        .with_target_assignment(target_assignment);
                }
            };

            if waited.version != expected_version {
                info!(
                    table = table_name,
                    "ideal state changed externally, re-planning"
                );
                current = waited.assignment.clone();
                target_assignment = match self.strategy.rebalance_table(
                    &current,
                    &instance_partitions_map,
                    table_config,
                    rebalance_config.include_consuming,
                ) {
                    Ok(t) => t,
                    Err(e) => {
                        return RebalanceResult::failed(e.to_string())
                            .with_target_assignment(target_assignment);
                    }
                };
                expected_version = waited.version;
                ideal_state = waited;
            }

            if current == target_assignment {
                info!(table = table_name, "no-downtime rebalance converged");
                return RebalanceResult::done("No-downtime rebalance complete")
                    .with_target_assignment(target_assignment)
                    .with_instance_partitions_map(instance_partitions_map);
            }

            let current_replicas = crate::model::segment_replica_count(&current).unwrap_or(0);
            let target_replicas = crate::model::segment_replica_count(&target_assignment).unwrap_or(0);
            let num_replicas = current_replicas.min(target_replicas);
            let min_available_replicas = match effective_min_available_replicas(
                table_name,
                num_replicas,
                rebalance_config.min_replicas_to_keep_up_for_no_downtime,
            ) {
                Ok(n) => n,
                Err(e) => {
                    return RebalanceResult::failed(e.to_string())
                        .with_target_assignment(target_assignment);
                }
            };

            let next = get_next_assignment(&current, &target_assignment, min_available_replicas);
            iterations += 1;
            metrics::histogram!(
                "rebalancer_step_planner_iterations",
                &[("table", table_name.to_string())]
            )
            .record(iterations as f64);

            let record = IdealState {
                version: expected_version,
                enabled: ideal_state.enabled,
                assignment: next.clone(),
                num_partitions: ideal_state.num_partitions,
                replicas: ideal_state.replicas,
            };

            match self
                .gateway
                .cas_ideal_state(table_name, &record, expected_version)
                .await
            {
                Ok(CasOutcome::Applied) => {
                    current = next;
                    expected_version += 1;
                }
                Ok(CasOutcome::VersionMismatch) => {
                    metrics::counter!("rebalancer_cas_retries_total", &[("table", table_name.to_string())])
                        .increment(1);
                    warn!(
                        table = table_name,
                        "CAS version mismatch advancing step, re-reading and re-planning next iteration"
                    );
                }
                Err(e) => {
                    return RebalanceResult::failed(e.to_string())
                        .with_target_assignment(target_assignment);
                }
            }
        }
    }
}

/// All segments in a well-formed assignment share the same replica
/// count (§3 invariant). Heterogeneous replica counts are rejected
/// rather than silently misbehaving (§9 Open Question resolution).
fn validate_uniform_replica_count(table_name: &str, assignment: &Assignment) -> Result<()> {
    let mut counts = assignment.values().map(|m| m.len());
    let Some(first) = counts.next() else {
        return Ok(());
    };
    if counts.all(|c| c == first) {
        Ok(())
    } else {
        Err(Error::HeterogeneousReplicaCount(table_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_replica_count_passes() {
        let assignment = Assignment::from([
            (
                "s0".to_string(),
                crate::model::InstanceStateMap::from([(
                    "i1".to_string(),
                    crate::model::SegmentState::Online,
                )]),
            ),
            (
                "s1".to_string(),
                crate::model::InstanceStateMap::from([(
                    "i2".to_string(),
                    crate::model::SegmentState::Online,
                )]),
            ),
        ]);
        assert!(validate_uniform_replica_count("t", &assignment).is_ok());
    }

    #[test]
    fn heterogeneous_replica_count_fails() {
        let assignment = Assignment::from([
            (
                "s0".to_string(),
                crate::model::InstanceStateMap::from([(
                    "i1".to_string(),
                    crate::model::SegmentState::Online,
                )]),
            ),
            (
                "s1".to_string(),
                crate::model::InstanceStateMap::from([
                    ("i1".to_string(), crate::model::SegmentState::Online),
                    ("i2".to_string(), crate::model::SegmentState::Online),
                ]),
            ),
        ]);
        assert!(matches!(
            validate_uniform_replica_count("t", &assignment),
            Err(Error::HeterogeneousReplicaCount(_))
        ));
    }
}

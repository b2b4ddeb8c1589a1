use crate::error::{Error, Result};
use crate::model::{Assignment, InstanceStateMap};

/// Compute the effective `min_available_replicas` floor for a no-downtime
/// rebalance (§4.5).
///
/// `num_replicas` is the replica count shared by `current` and `target`
/// (already validated to be uniform across segments and equal between
/// the two assignments by the caller).
pub fn effective_min_available_replicas(
    table_name: &str,
    num_replicas: usize,
    min_replicas_to_keep_up_for_no_downtime: i32,
) -> Result<usize> {
    if min_replicas_to_keep_up_for_no_downtime >= 0 {
        let min = min_replicas_to_keep_up_for_no_downtime as usize;
        if min >= num_replicas {
            return Err(Error::InvalidConfig(format!(
                "{table_name}: min_replicas_to_keep_up_for_no_downtime ({min}) must be < num_replicas ({num_replicas})"
            )));
        }
        Ok(min)
    } else {
        let deficit = min_replicas_to_keep_up_for_no_downtime.unsigned_abs() as usize;
        Ok(num_replicas.saturating_sub(deficit))
    }
}

/// Produce an assignment between `current` and `target` such that every
/// segment retains at least `min_available_replicas` instances in
/// common with `current` (§4.5, P1/P2/P3).
pub fn get_next_assignment(
    current: &Assignment,
    target: &Assignment,
    min_available_replicas: usize,
) -> Assignment {
    let mut next = Assignment::new();
    for (segment, target_states) in target {
        let current_states = current.get(segment);
        next.insert(
            segment.clone(),
            next_segment_assignment(current_states, target_states, min_available_replicas),
        );
    }
    next
}

fn next_segment_assignment(
    current: Option<&InstanceStateMap>,
    target: &InstanceStateMap,
    min_available_replicas: usize,
) -> InstanceStateMap {
    let empty = InstanceStateMap::new();
    let current = current.unwrap_or(&empty);

    let mut next = InstanceStateMap::new();

    // 1. Common-keep: instances present in both carry the *target* state,
    //    so they progress their state machine (e.g. CONSUMING -> ONLINE).
    for (instance, state) in target {
        if current.contains_key(instance) {
            next.insert(instance.clone(), *state);
        }
    }

    // 2. Top-up with current: retained current-only instances keep
    //    serving at their *current* state to preserve availability.
    if next.len() < min_available_replicas {
        for (instance, state) in current {
            if next.len() >= min_available_replicas {
                break;
            }
            next.entry(instance.clone()).or_insert(*state);
        }
    }

    // 3. Fill to target size from target, in order.
    for (instance, state) in target {
        if next.len() >= target.len() {
            break;
        }
        next.entry(instance.clone()).or_insert(*state);
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentState::*;

    fn states(pairs: &[(&str, crate::model::SegmentState)]) -> InstanceStateMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn assignment(segment: &str, states: InstanceStateMap) -> Assignment {
        Assignment::from([(segment.to_string(), states)])
    }

    #[test]
    fn scenario_min_replicas_one() {
        let current = assignment("s", states(&[("i1", Online), ("i2", Online)]));
        let target = assignment("s", states(&[("i3", Online), ("i4", Online)]));
        let next = get_next_assignment(&current, &target, 1);
        assert_eq!(next["s"], states(&[("i1", Online), ("i3", Online)]));
    }

    #[test]
    fn scenario_state_progression() {
        let current = assignment("s", states(&[("i1", Consuming), ("i2", Consuming)]));
        let target = assignment("s", states(&[("i1", Online), ("i2", Online)]));
        let next = get_next_assignment(&current, &target, 1);
        assert_eq!(next["s"], target["s"]);
    }

    #[test]
    fn converges_when_current_equals_target() {
        let current = assignment("s", states(&[("i1", Online), ("i2", Online)]));
        let target = current.clone();
        let next = get_next_assignment(&current, &target, 1);
        assert_eq!(next, target);
    }

    #[test]
    fn min_available_replicas_nonnegative_must_be_below_num_replicas() {
        assert!(effective_min_available_replicas("t", 2, 2).is_err());
        assert_eq!(effective_min_available_replicas("t", 2, 1).unwrap(), 1);
    }

    #[test]
    fn min_available_replicas_negative_means_max_unavailable() {
        assert_eq!(effective_min_available_replicas("t", 3, -1).unwrap(), 2);
        assert_eq!(effective_min_available_replicas("t", 3, -5).unwrap(), 0);
    }

    #[test]
    fn no_common_instances_tops_up_from_current_before_filling_target() {
        // min_available_replicas = 2, target fully disjoint from current.
        let current = assignment(
            "s",
            states(&[("i1", Online), ("i2", Online), ("i3", Online)]),
        );
        let target = assignment(
            "s",
            states(&[("i4", Online), ("i5", Online), ("i6", Online)]),
        );
        let next = get_next_assignment(&current, &target, 2);
        // Two from current retained (sorted: i1, i2), then filled from target to size 3.
        assert_eq!(next["s"].len(), 3);
        assert!(next["s"].contains_key("i1"));
        assert!(next["s"].contains_key("i2"));
    }

    #[test]
    fn repeated_application_reaches_target() {
        let current = assignment(
            "s",
            states(&[("i1", Consuming), ("i2", Consuming), ("i3", Consuming)]),
        );
        let target = assignment("s", states(&[("i4", Online), ("i5", Online), ("i2", Online)]));
        let mut cur = current;
        for _ in 0..10 {
            if cur == target {
                break;
            }
            cur = get_next_assignment(&cur, &target, 1);
        }
        assert_eq!(cur, target);
    }
}

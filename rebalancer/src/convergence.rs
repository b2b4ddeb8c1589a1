use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Assignment, ExternalView, SegmentState};

/// Decide whether `ev` has converged to the non-`OFFLINE` portion of
/// `is_assignment` (§4.4).
///
/// Segments or instances present only in `ev` are ignored. A segment
/// whose IS entries are all `Offline` converges vacuously even if `ev`
/// is missing that segment entirely.
pub fn has_converged(
    table_name: &str,
    ev: &ExternalView,
    is_assignment: &Assignment,
    best_efforts: bool,
) -> Result<bool> {
    for (segment, is_states) in is_assignment {
        let ev_states = ev.assignment.get(segment);

        for (instance, is_state) in is_states {
            if *is_state == SegmentState::Offline {
                continue;
            }

            let Some(ev_states) = ev_states else {
                return Ok(false);
            };

            match ev_states.get(instance) {
                Some(ev_state) if *ev_state == *is_state => {}
                Some(SegmentState::Error) => {
                    if best_efforts {
                        warn!(
                            table = table_name,
                            segment, instance, "segment in ERROR state, treating as converged"
                        );
                    } else {
                        return Err(Error::SegmentsInError(table_name.to_string()));
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    Ok(true)
}

use std::time::{Duration, Instant};

use tracing::warn;

use crate::convergence::has_converged;
use crate::error::{Error, Result};
use crate::gateway::MetadataStoreGateway;
use crate::model::IdealState;

pub const EXTERNAL_VIEW_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const EXTERNAL_VIEW_STABILIZATION_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Poll `ExternalView` until it converges to the currently committed
/// `IdealState` (§4.7), returning the latest `IdealState` read along the
/// way (the caller re-diffs its version to notice externally-applied
/// changes).
///
/// On timeout: `best_efforts` downgrades to a warning and returns the
/// latest IS; otherwise raises `Error::ConvergenceTimeout`. If the IS
/// disappears mid-wait (table deleted), raises `Error::TableNotFound`.
pub async fn wait_for_external_view_to_converge(
    gateway: &dyn MetadataStoreGateway,
    table_name: &str,
    best_efforts: bool,
    check_interval: Duration,
    max_wait: Duration,
) -> Result<IdealState> {
    let start = Instant::now();

    loop {
        let ideal_state = gateway
            .read_ideal_state(table_name)
            .await?
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        let external_view = gateway
            .read_external_view(table_name)
            .await?
            .unwrap_or_default();

        if has_converged(
            table_name,
            &external_view,
            &ideal_state.assignment,
            best_efforts,
        )? {
            return Ok(ideal_state);
        }

        if start.elapsed() >= max_wait {
            if best_efforts {
                warn!(
                    table = table_name,
                    ?max_wait, "external view did not converge within max wait, proceeding (best_efforts)"
                );
                return Ok(ideal_state);
            }
            return Err(Error::ConvergenceTimeout(table_name.to_string(), max_wait));
        }

        tokio::time::sleep(check_interval).await;
    }
}

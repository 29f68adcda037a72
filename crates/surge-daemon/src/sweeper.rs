//! Scheduled expiry sweep.
//!
//! One background task runs `holds:process-expired` on an interval. Overlap
//! prevention is two-layer: the loop itself is sequential (a tick cannot
//! start while the previous sweep is still awaited), and a Postgres
//! advisory lock makes the sweep single-flight across a fleet: a process
//! that loses the lock skips its tick instead of waiting.

use std::sync::Arc;
use std::time::Duration;

use surge_db::CoordError;
use surge_inventory::SweepReport;
use tracing::{debug, error};

use crate::state::AppState;

pub const SWEEP_JOB_NAME: &str = "holds:process-expired";

pub const ENV_SWEEP_INTERVAL_SECS: &str = "SURGE_SWEEP_INTERVAL_SECS";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Sweep cadence from SURGE_SWEEP_INTERVAL_SECS, defaulting to one minute.
pub fn sweep_interval_from_env() -> Duration {
    let secs = std::env::var(ENV_SWEEP_INTERVAL_SECS)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    Duration::from_secs(secs)
}

/// Spawn the sweeper loop. A failed sweep is logged and the loop keeps
/// going; the next tick retries from scratch.
pub fn spawn_expiry_sweeper(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&state).await {
                error!(job = SWEEP_JOB_NAME, error = %err, "expiry sweep failed");
            }
        }
    });
}

/// Run one sweep under the fleet-wide advisory lock. Returns `None` when
/// another instance held the lock and this tick was skipped.
pub async fn sweep_once(state: &AppState) -> Result<Option<SweepReport>, CoordError> {
    let key = surge_db::advisory_lock_key(SWEEP_JOB_NAME);

    // The advisory lock is session-scoped: hold one connection for the
    // duration so lock and unlock land on the same session.
    let mut conn = state.pool.acquire().await?;

    if !surge_db::try_advisory_lock(&mut conn, key).await? {
        debug!(job = SWEEP_JOB_NAME, "another instance holds the job lock; skipping tick");
        return Ok(None);
    }

    let result =
        surge_inventory::process_expired_holds(&state.pool, &state.cache, &state.metrics).await;

    // Always release, even when the sweep failed.
    let unlock = surge_db::advisory_unlock(&mut conn, key).await;

    let report = result?;
    unlock?;
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the env var is never touched from two threads at once.
    #[test]
    fn interval_parses_env_and_rejects_nonsense() {
        std::env::remove_var(ENV_SWEEP_INTERVAL_SECS);
        assert_eq!(sweep_interval_from_env(), Duration::from_secs(60));

        std::env::set_var(ENV_SWEEP_INTERVAL_SECS, "0");
        assert_eq!(sweep_interval_from_env(), Duration::from_secs(60));

        std::env::set_var(ENV_SWEEP_INTERVAL_SECS, "soon");
        assert_eq!(sweep_interval_from_env(), Duration::from_secs(60));

        std::env::set_var(ENV_SWEEP_INTERVAL_SECS, "15");
        assert_eq!(sweep_interval_from_env(), Duration::from_secs(15));

        std::env::remove_var(ENV_SWEEP_INTERVAL_SECS);
    }
}

use std::time::Duration;

use chrono::Utc;

use crate::bidding;
use crate::state::AppState;

/// Spawns the expiry sweeper: a periodic, stateless batch that expires
/// open bids whose window elapses on the current day. Safe to run
/// alongside live placement and settlement; the status guard in the
/// sweep resolves any race.
pub fn start_background_tasks(state: AppState) {
    if !state.cfg.sweeper.enabled {
        tracing::info!("expiry sweeper disabled");
        return;
    }
    let interval = Duration::from_secs(state.cfg.sweeper.interval_seconds.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let as_of = Utc::now();
            match bidding::expire_due_bids(&state.db, state.ledger_mode, as_of).await {
                Ok(0) => tracing::debug!("expiry sweep: nothing due"),
                Ok(expired) => tracing::info!(expired, "expiry sweep"),
                Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
            }
        }
    });
}

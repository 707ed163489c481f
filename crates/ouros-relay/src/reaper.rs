//! Background task that expires idle sessions.

use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::session_store::SessionStore;

/// Spawns the reaper on the current runtime.
///
/// Every `reap_interval` (clamped, see
/// [`RelayConfig::effective_reap_interval`](crate::RelayConfig::effective_reap_interval))
/// the task runs [`SessionStore::reap`], independent of request traffic. It
/// stops when `shutdown` is cancelled.
pub fn spawn_reaper(store: Arc<SessionStore>, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = store.config().effective_reap_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "session reaper started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = store.reap(std::time::Instant::now());
                    if reaped > 0 {
                        tracing::info!(reaped, remaining = store.len(), "reaped idle sessions");
                    }
                }
            }
        }

        tracing::info!("session reaper stopped");
    })
}

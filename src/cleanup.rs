//! Background eviction of expired sessions and stale replay entries.
//!
//! One ticker owned by the process lifecycle replaces the
//! timer-reschedules-itself chains seen in ad-hoc implementations: the task
//! runs until told to stop over a `watch` channel, and a tick can never
//! abort the schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::SessionService;

/// Spawn the periodic sweep.  The task exits when `shutdown` flips to true;
/// the returned handle lets the caller await that exit.
pub fn spawn(
    sessions: Arc<SessionService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval_secs = interval.as_secs(), "cleanup task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (sessions_removed, replays_removed) = sessions.sweep(Utc::now()).await;
                    if sessions_removed > 0 || replays_removed > 0 {
                        tracing::debug!(
                            sessions_removed,
                            replays_removed,
                            "cleanup sweep evicted entries"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("cleanup task stopping");
                        break;
                    }
                }
            }
        }
    })
}

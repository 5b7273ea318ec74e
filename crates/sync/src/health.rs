//! Reachability polling and the session's start/stop lifecycle.

use std::{sync::Arc, time::Duration};

use {
    tokio::time::MissedTickBehavior,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::sync_metrics;

use crate::session::ProjectSession;

impl ProjectSession {
    /// Start polling the store's health endpoint.
    ///
    /// The first healthy poll triggers [`ProjectSession::restore`]. Calling
    /// `start` on a running session does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.health_task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            debug!("health monitor already running");
            return;
        }

        let period = self.options.health_interval.max(Duration::from_millis(1));
        let session = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.poll_health().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "health monitor started");
    }

    /// Stop polling and disarm autosave. In-flight writes finish on their
    /// own.
    pub fn stop(&self) {
        let handle = self
            .health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.autosave.reset();
        info!("session stopped");
    }

    /// One health check. Updates the offline flag, resumes autosave for
    /// unsynced edits after an outage, and runs restoration if it has not
    /// run yet. Returns whether the store was reachable.
    pub async fn poll_health(self: &Arc<Self>) -> bool {
        let healthy = self.remote.health.check_health().await;

        let recovered = {
            let mut state = self.lock_state();
            let was_offline = state.offline;
            state.offline = !healthy;
            if was_offline != state.offline {
                self.publish(&state);
            }
            was_offline && healthy
        };

        if !healthy {
            #[cfg(feature = "metrics")]
            metrics::counter!(sync_metrics::HEALTH_FAILURES_TOTAL).increment(1);
            warn!("remote store unreachable");
            return false;
        }

        if recovered {
            let resumed = self.resume_autosave_if_dirty();
            info!(resumed_autosave = resumed, "remote store reachable again");
        }
        self.restore().await;
        true
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            Error,
            prefs::MemoryPreferences,
            session::SessionOptions,
        },
        quill_projects::{MemoryRemote, Remote, file_system},
    };

    fn setup(persisted: Option<&str>) -> (Arc<MemoryRemote>, Arc<ProjectSession>) {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("p1", "One", file_system([("a.txt", "1")]));
        let prefs = Arc::new(match persisted {
            Some(id) => MemoryPreferences::with_project_id(id),
            None => MemoryPreferences::new(),
        });
        let session = ProjectSession::new(
            Remote::from_store(Arc::clone(&remote)),
            prefs,
            SessionOptions::default(),
        );
        (remote, session)
    }

    #[tokio::test(start_paused = true)]
    async fn first_healthy_poll_restores() {
        let (_remote, session) = setup(Some("p1"));
        session.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(session.snapshot().current_id(), Some("p1"));
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn outage_blocks_operations_until_recovery() {
        let (remote, session) = setup(Some("p1"));
        remote.set_healthy(false);
        session.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snap = session.snapshot();
        assert!(snap.offline);
        assert!(!snap.is_open());
        assert!(matches!(session.open("p1").await, Err(Error::Offline)));

        remote.set_healthy(true);
        tokio::time::sleep(Duration::from_millis(5100)).await;

        let snap = session.snapshot();
        assert!(!snap.offline);
        // Restoration waited for the store.
        assert_eq!(snap.current_id(), Some("p1"));
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_resumes_autosave_for_unsynced_edits() {
        let (remote, session) = setup(None);
        session.open("p1").await.unwrap();

        remote.set_healthy(false);
        assert!(!session.poll_health().await);
        assert!(session.update_files(file_system([("a.txt", "2")])).unwrap());
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(remote.write_count("p1"), 0);
        assert!(matches!(session.save().await, Err(Error::Offline)));

        remote.set_healthy(true);
        assert!(session.poll_health().await);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(remote.write_count("p1"), 1);
        assert_eq!(remote.files("p1").unwrap()["a.txt"], "2");
        assert!(!session.snapshot().dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disarms_autosave() {
        let (remote, session) = setup(None);
        session.start();
        session.open("p1").await.unwrap();
        session.update_files(file_system([("a.txt", "2")])).unwrap();

        session.stop();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(remote.write_count("p1"), 0);
        assert!(session.snapshot().dirty);
    }
}

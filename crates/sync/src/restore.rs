//! Reopening the last used project on startup.

use std::sync::{Arc, atomic::Ordering};

use {
    quill_projects::ProjectMeta,
    tracing::{debug, info, warn},
};

use crate::{session::ProjectSession, state::Phase};

/// How a restoration attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Restoration already ran for this session.
    AlreadyRan,
    /// No project id was persisted, or it could not be read.
    NothingPersisted,
    Restored(ProjectMeta),
    /// An explicit open, create, or close got there first.
    Superseded,
    /// The persisted project no longer resolves; the id was forgotten.
    Cleared,
    /// The store could not be reached. The id is kept and the next healthy
    /// poll tries again.
    Deferred,
}

impl ProjectSession {
    /// Reopen the persisted project, once per session.
    ///
    /// Runs under the same fence as [`ProjectSession::open`], so any explicit
    /// switch issued while the fetch is in flight wins.
    pub async fn restore(self: &Arc<Self>) -> RestoreOutcome {
        if self.restoration_started.swap(true, Ordering::AcqRel) {
            return RestoreOutcome::AlreadyRan;
        }
        let Some(id) = self.persisted_project_id() else {
            debug!("no persisted project to restore");
            return RestoreOutcome::NothingPersisted;
        };

        let token = {
            let mut state = self.lock_state();
            if state.offline {
                drop(state);
                self.restoration_started.store(false, Ordering::Release);
                debug!(id = %id, "store offline, restoration deferred");
                return RestoreOutcome::Deferred;
            }
            if state.phase != Phase::Empty {
                debug!(id = %id, "a project was chosen before restoration, skipping");
                return RestoreOutcome::Superseded;
            }
            self.switch_locked(&mut state)
        };

        info!(id = %id, "restoring last project");
        let (meta, context) = self.fetch_project(&id).await;

        let mut state = self.lock_state();
        if !self.fences.is_current(&token) {
            drop(state);
            self.note_superseded("restore");
            return RestoreOutcome::Superseded;
        }

        match meta {
            Ok(meta) => {
                self.adopt_locked(&mut state, meta.clone(), context);
                self.publish(&state);
                drop(state);
                info!(id = %id, version = meta.version, "last project restored");
                self.spawn_git_refresh(token, meta.id.clone());
                RestoreOutcome::Restored(meta)
            },
            Err(e) if e.is_unavailable() => {
                state.clear_project();
                state.offline = true;
                self.publish(&state);
                drop(state);
                self.restoration_started.store(false, Ordering::Release);
                warn!(id = %id, error = %e, "store unreachable, restoration deferred");
                RestoreOutcome::Deferred
            },
            Err(e) => {
                state.clear_project();
                self.persist_project_id(None);
                self.publish(&state);
                drop(state);
                info!(id = %id, error = %e, "persisted project no longer resolves, forgetting it");
                RestoreOutcome::Cleared
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            prefs::MemoryPreferences,
            session::{Outcome, SessionOptions},
        },
        quill_projects::{
            InjectedFailure, MemoryRemote, NewProject, Remote, RemoteOp, file_system,
        },
        std::time::Duration,
    };

    fn setup(
        persisted: Option<&str>,
    ) -> (Arc<MemoryRemote>, Arc<MemoryPreferences>, Arc<ProjectSession>) {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("p1", "One", file_system([("a.txt", "1")]));
        let prefs = Arc::new(match persisted {
            Some(id) => MemoryPreferences::with_project_id(id),
            None => MemoryPreferences::new(),
        });
        let session = ProjectSession::new(
            Remote::from_store(Arc::clone(&remote)),
            prefs.clone(),
            SessionOptions::default(),
        );
        (remote, prefs, session)
    }

    #[tokio::test]
    async fn restores_persisted_project_once() {
        let (remote, _prefs, session) = setup(Some("p1"));

        let outcome = session.restore().await;
        assert!(matches!(outcome, RestoreOutcome::Restored(ref m) if m.id == "p1"));
        assert_eq!(session.snapshot().current_id(), Some("p1"));

        assert_eq!(session.restore().await, RestoreOutcome::AlreadyRan);
        assert_eq!(remote.call_count(RemoteOp::Get), 1);
    }

    #[tokio::test]
    async fn nothing_persisted() {
        let (_remote, _prefs, session) = setup(None);
        assert_eq!(session.restore().await, RestoreOutcome::NothingPersisted);
        assert!(!session.snapshot().is_open());
    }

    #[tokio::test]
    async fn deleted_project_clears_persisted_id_quietly() {
        let (remote, prefs, session) = setup(Some("gone"));

        assert_eq!(session.restore().await, RestoreOutcome::Cleared);
        assert_eq!(prefs.stored(), None);

        let snap = session.snapshot();
        assert!(!snap.is_open());
        assert!(!snap.syncing);
        assert!(snap.error.is_none());

        assert_eq!(session.restore().await, RestoreOutcome::AlreadyRan);
        assert_eq!(remote.call_count(RemoteOp::Get), 1);
    }

    #[tokio::test]
    async fn unreachable_store_defers_and_keeps_id() {
        let (remote, prefs, session) = setup(Some("p1"));
        remote.set_failure(RemoteOp::Get, Some(InjectedFailure::Unavailable));

        assert_eq!(session.restore().await, RestoreOutcome::Deferred);
        assert_eq!(prefs.stored().as_deref(), Some("p1"));
        let snap = session.snapshot();
        assert!(snap.offline);
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn unreadable_preferences_mean_nothing_to_restore() {
        let (_remote, prefs, session) = setup(Some("p1"));
        prefs.set_failing(true);
        assert_eq!(session.restore().await, RestoreOutcome::NothingPersisted);
        assert!(session.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn skipped_when_a_project_is_already_open() {
        let (remote, _prefs, session) = setup(Some("p1"));
        remote.seed("p2", "Two", file_system([("b.txt", "2")]));
        session.open("p2").await.unwrap();

        assert_eq!(session.restore().await, RestoreOutcome::Superseded);
        assert_eq!(session.snapshot().current_id(), Some("p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_create_wins_over_slow_restoration() {
        let (remote, prefs, session) = setup(Some("p1"));
        remote.set_delay_for(RemoteOp::Get, "p1", Duration::from_millis(500));

        let restoring = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.restore().await })
        };
        // Let restoration reach its fetch.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.snapshot().syncing);

        let created = session
            .create(NewProject {
                name: "Fresh".into(),
                ..NewProject::default()
            })
            .await
            .unwrap();
        let Outcome::Applied(created) = created else {
            panic!("create should win");
        };

        assert_eq!(restoring.await.unwrap(), RestoreOutcome::Superseded);
        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some(created.id.as_str()));
        assert_eq!(prefs.stored(), Some(created.id));
    }
}

//! Session state and the immutable snapshots handed to observers.

use {
    quill_projects::{FileSystem, GitStatus, ProjectContext, ProjectMeta, ProjectSummary},
    serde::Serialize,
};

use crate::gate::SyncConfirmation;

/// Lifecycle phase. `Opening` and `Closing` only show up to observers as
/// [`SessionSnapshot::syncing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    Empty,
    Opening,
    Open,
    Closing,
}

/// Error classes surfaced on session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The store could not be reached.
    RemoteUnavailable,
    /// The store answered but refused the operation.
    RemoteRejected,
}

/// The single error visible on the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub operation: String,
    pub message: String,
}

impl SessionError {
    pub(crate) fn from_remote(operation: &str, error: &quill_projects::Error) -> Self {
        let kind = if error.is_unavailable() {
            ErrorKind::RemoteUnavailable
        } else {
            ErrorKind::RemoteRejected
        };
        Self {
            kind,
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }
}

/// What observers see.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// The current project as last loaded from the store.
    pub project: Option<ProjectMeta>,
    /// The working copy. Empty when no project is open.
    pub files: FileSystem,
    /// `None` while unknown.
    pub git_status: Option<GitStatus>,
    pub context: Option<ProjectContext>,
    pub projects: Vec<ProjectSummary>,
    /// An open/close is in progress or a write is in flight.
    pub syncing: bool,
    /// The working copy differs from what was last written.
    pub dirty: bool,
    pub offline: bool,
    pub error: Option<SessionError>,
    pub pending_sync: Option<SyncConfirmation>,
}

impl SessionSnapshot {
    pub fn current_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }

    pub fn is_open(&self) -> bool {
        self.project.is_some()
    }
}

/// Mutable state, owned by the session behind its mutex.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub phase: Phase,
    pub project: Option<ProjectMeta>,
    pub files: FileSystem,
    /// Content the store is known to hold at `base_version`.
    pub synced_files: FileSystem,
    pub base_version: u64,
    pub git_status: Option<GitStatus>,
    pub context: Option<ProjectContext>,
    pub projects: Vec<ProjectSummary>,
    pub writes_in_flight: usize,
    pub offline: bool,
    pub error: Option<SessionError>,
}

impl SessionState {
    pub fn current_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }

    pub fn is_current(&self, id: &str) -> bool {
        self.current_id() == Some(id)
    }

    pub fn is_dirty(&self) -> bool {
        self.project.is_some() && self.files != self.synced_files
    }

    /// Install a freshly loaded project: meta, working copy, and the unknown
    /// git status all change together.
    pub fn adopt(&mut self, meta: ProjectMeta, context: Option<ProjectContext>) {
        self.files = meta.files.clone();
        self.synced_files = meta.files.clone();
        self.base_version = meta.version;
        self.upsert_summary(meta.summary());
        self.project = Some(meta);
        self.git_status = None;
        self.context = context;
        self.phase = Phase::Open;
    }

    /// Take the store's copy of the current project, dropping local edits.
    /// Git status and context are kept.
    pub fn reload(&mut self, meta: ProjectMeta) {
        self.files = meta.files.clone();
        self.synced_files = meta.files.clone();
        self.base_version = meta.version;
        self.upsert_summary(meta.summary());
        self.project = Some(meta);
    }

    /// Back to `Empty`. The project list survives.
    pub fn clear_project(&mut self) {
        self.project = None;
        self.files.clear();
        self.synced_files.clear();
        self.base_version = 0;
        self.git_status = None;
        self.context = None;
        self.phase = Phase::Empty;
    }

    pub fn upsert_summary(&mut self, summary: ProjectSummary) {
        match self.projects.iter_mut().find(|p| p.id == summary.id) {
            Some(existing) => *existing = summary,
            None => self.projects.insert(0, summary),
        }
    }

    pub fn remove_summary(&mut self, id: &str) {
        self.projects.retain(|p| p.id != id);
    }

    /// Record a remote failure. Connectivity failures also flip `offline`.
    pub fn record_remote_error(&mut self, operation: &str, error: &quill_projects::Error) {
        if error.is_unavailable() {
            self.offline = true;
        }
        self.error = Some(SessionError::from_remote(operation, error));
    }

    pub fn snapshot(&self, pending_sync: Option<SyncConfirmation>) -> SessionSnapshot {
        SessionSnapshot {
            project: self.project.clone(),
            files: self.files.clone(),
            git_status: self.git_status.clone(),
            context: self.context.clone(),
            projects: self.projects.clone(),
            syncing: matches!(self.phase, Phase::Opening | Phase::Closing)
                || self.writes_in_flight > 0,
            dirty: self.is_dirty(),
            offline: self.offline,
            error: self.error.clone(),
            pending_sync,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, quill_projects::file_system, rstest::rstest};

    fn meta(id: &str, version: u64) -> ProjectMeta {
        ProjectMeta {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            files: file_system([("a.txt", "1")]),
            created_at: 0,
            updated_at: 0,
            version,
        }
    }

    #[test]
    fn adopt_replaces_everything_at_once() {
        let mut state = SessionState {
            git_status: Some(GitStatus::default()),
            phase: Phase::Opening,
            ..SessionState::default()
        };
        state.adopt(meta("p1", 3), None);

        assert_eq!(state.phase, Phase::Open);
        assert_eq!(state.base_version, 3);
        assert!(state.git_status.is_none());
        assert!(!state.is_dirty());
        assert_eq!(state.projects.len(), 1);

        state.files.insert("b.txt".into(), "2".into());
        assert!(state.is_dirty());
        assert!(state.snapshot(None).dirty);
    }

    #[test]
    fn clear_keeps_project_list() {
        let mut state = SessionState::default();
        state.adopt(meta("p1", 1), None);
        state.clear_project();
        assert_eq!(state.phase, Phase::Empty);
        assert!(state.files.is_empty());
        assert_eq!(state.projects.len(), 1);
        assert!(!state.snapshot(None).is_open());
    }

    #[rstest]
    #[case(
        quill_projects::Error::unavailable(
            "get",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
        ),
        ErrorKind::RemoteUnavailable,
        true
    )]
    #[case(quill_projects::Error::not_found("p9"), ErrorKind::RemoteRejected, false)]
    #[case(
        quill_projects::Error::rejected("create", 422, "name required"),
        ErrorKind::RemoteRejected,
        false
    )]
    #[case(quill_projects::Error::message("bad payload"), ErrorKind::RemoteRejected, false)]
    fn remote_errors_are_classified(
        #[case] error: quill_projects::Error,
        #[case] kind: ErrorKind,
        #[case] offline: bool,
    ) {
        let mut state = SessionState::default();
        state.record_remote_error("open", &error);
        assert_eq!(state.offline, offline);
        let recorded = state.error.unwrap();
        assert_eq!(recorded.kind, kind);
        assert_eq!(recorded.operation, "open");
        assert_eq!(recorded.message, error.to_string());
    }

    #[test]
    fn syncing_covers_transient_phases_and_writes() {
        let mut state = SessionState::default();
        assert!(!state.snapshot(None).syncing);
        state.phase = Phase::Closing;
        assert!(state.snapshot(None).syncing);
        state.phase = Phase::Open;
        state.writes_in_flight = 1;
        assert!(state.snapshot(None).syncing);
    }
}

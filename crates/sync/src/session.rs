//! The project session: sole owner of the working copy.
//!
//! Every operation that replaces the current project (open, create, close,
//! restore, deleting the current project) advances the
//! [`FenceResource::CurrentProject`] fence under the state lock, and every
//! async continuation re-checks its token under the same lock before it
//! touches state. A continuation that lost the race returns
//! [`Outcome::Superseded`] and leaves no trace.
//!
//! Lock order: `state` before the gate slot and the autosave slot. Neither
//! of those ever calls back into the session while held.

use std::{
    sync::{Arc, Mutex, MutexGuard, atomic::AtomicBool},
    time::Duration,
};

use {
    quill_config::QuillConfig,
    quill_projects::{
        FileSystem, GitStatus, NewProject, ProjectContext, ProjectMeta, ProjectSummary, Remote,
    },
    tokio::{sync::watch, task::JoinHandle},
    tracing::{debug, info, trace, warn},
};

#[cfg(feature = "metrics")]
use crate::sync_metrics;

use crate::{
    Error, Result,
    autosave::AutosaveDebouncer,
    fence::{FenceResource, FenceToken, OperationFences},
    gate::{AbortReason, ConfirmedWrite, SyncConfirmation, SyncGate, WriteOutcome, WriteRequest},
    prefs::PreferenceStore,
    state::{Phase, SessionSnapshot, SessionState},
};

/// Session tuning, usually derived from [`QuillConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub autosave_enabled: bool,
    pub autosave_delay: Duration,
    pub health_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autosave_enabled: true,
            autosave_delay: Duration::from_millis(1000),
            health_interval: Duration::from_millis(5000),
        }
    }
}

impl From<&QuillConfig> for SessionOptions {
    fn from(config: &QuillConfig) -> Self {
        Self {
            autosave_enabled: config.autosave.enabled,
            autosave_delay: config.autosave.debounce(),
            health_interval: config.remote.health_interval(),
        }
    }
}

/// Result of an operation that can lose a race against a newer one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    /// A newer operation took over before this one finished; nothing was
    /// applied.
    Superseded,
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

/// What an operation on the current project needs to know about it.
struct Target {
    token: FenceToken,
    id: String,
    files: FileSystem,
}

pub struct ProjectSession {
    pub(crate) remote: Remote,
    prefs: Arc<dyn PreferenceStore>,
    pub(crate) options: SessionOptions,
    pub(crate) fences: OperationFences,
    pub(crate) autosave: AutosaveDebouncer,
    gate: SyncGate,
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionSnapshot>,
    pub(crate) restoration_started: AtomicBool,
    pub(crate) health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectSession {
    pub fn new(
        remote: Remote,
        prefs: Arc<dyn PreferenceStore>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Arc::new(Self {
            remote,
            prefs,
            autosave: AutosaveDebouncer::new(options.autosave_delay),
            options,
            fences: OperationFences::new(),
            gate: SyncGate::new(),
            state: Mutex::new(SessionState::default()),
            updates,
            restoration_started: AtomicBool::new(false),
            health_task: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.updates.borrow().clone()
    }

    /// Receives a new snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub fn pending_sync(&self) -> Option<SyncConfirmation> {
        self.gate.pending()
    }

    pub fn clear_error(&self) {
        let mut state = self.lock_state();
        if state.error.take().is_some() {
            self.publish(&state);
        }
    }

    // ── Project lifecycle ───────────────────────────────────────────────────

    /// Create a project remotely and make it current.
    ///
    /// An unresolved confirmation for the previous project survives until
    /// the new project is adopted, so a failed create leaves it in place.
    pub async fn create(self: &Arc<Self>, project: NewProject) -> Result<Outcome<ProjectMeta>> {
        let token = {
            let mut state = self.lock_state();
            if state.offline {
                return Err(Error::Offline);
            }
            let token = self.replace_locked(&mut state);
            self.publish(&state);
            token
        };
        let name = project.name.clone();
        info!(name = %name, "creating project");
        let result = self.remote.projects.create(project).await;

        let mut state = self.lock_state();
        if !self.fences.is_current(&token) {
            // The project exists remotely either way.
            if let Ok(meta) = &result {
                state.upsert_summary(meta.summary());
                self.publish(&state);
            }
            drop(state);
            self.note_superseded("create");
            return Ok(Outcome::Superseded);
        }

        match result {
            Ok(meta) => {
                self.adopt_locked(&mut state, meta.clone(), None);
                self.publish(&state);
                drop(state);
                info!(id = %meta.id, name = %meta.name, "project created");
                self.spawn_git_refresh(token, meta.id.clone());
                Ok(Outcome::Applied(meta))
            },
            Err(e) => {
                warn!(name = %name, error = %e, "create failed");
                // The previous project, if any, was never torn down.
                state.phase = if state.project.is_some() {
                    Phase::Open
                } else {
                    Phase::Empty
                };
                state.record_remote_error("create", &e);
                self.publish(&state);
                let previous = state.current_id().map(str::to_string);
                drop(state);
                if let Some(id) = previous {
                    self.spawn_git_refresh(token, id);
                    self.resume_autosave_if_dirty();
                }
                Err(e.into())
            },
        }
    }

    /// Make `id` the current project.
    pub async fn open(self: &Arc<Self>, id: &str) -> Result<Outcome<ProjectMeta>> {
        let token = self.begin_switch()?;
        info!(id, "opening project");
        let (meta, context) = self.fetch_project(id).await;

        let mut state = self.lock_state();
        if !self.fences.is_current(&token) {
            drop(state);
            self.note_superseded("open");
            return Ok(Outcome::Superseded);
        }

        match meta {
            Ok(meta) => {
                self.adopt_locked(&mut state, meta.clone(), context);
                self.publish(&state);
                drop(state);
                info!(id, version = meta.version, files = meta.files.len(), "project opened");
                self.spawn_git_refresh(token, meta.id.clone());
                Ok(Outcome::Applied(meta))
            },
            Err(e) => {
                warn!(id, error = %e, "open failed");
                // The previous project is gone too, so there is nothing to
                // reopen next time.
                state.clear_project();
                self.persist_project_id(None);
                state.record_remote_error("open", &e);
                self.publish(&state);
                Err(e.into())
            },
        }
    }

    /// Drop the current project. Unsaved edits that have not been written
    /// yet are discarded along with any pending confirmation.
    pub fn close(&self) {
        let mut state = self.lock_state();
        self.autosave.reset();
        self.fences.begin(FenceResource::CurrentProject);
        self.fences.supersede(FenceResource::Sync);
        self.gate.discard();
        let closed = state.current_id().map(str::to_string);
        state.clear_project();
        state.error = None;
        self.persist_project_id(None);
        self.publish(&state);
        drop(state);
        if let Some(id) = closed {
            info!(id = %id, "project closed");
        }
    }

    /// Delete a project remotely. Deleting the current project also closes
    /// it once the store confirms.
    pub async fn delete(self: &Arc<Self>, id: &str) -> Result<Outcome<()>> {
        let token = {
            let mut state = self.lock_state();
            if state.offline {
                return Err(Error::Offline);
            }
            state.error = None;
            let token = if state.is_current(id) && state.phase == Phase::Open {
                self.autosave.reset();
                let token = self.fences.begin(FenceResource::CurrentProject);
                self.fences.supersede(FenceResource::Sync);
                state.phase = Phase::Closing;
                Some(token)
            } else {
                None
            };
            self.publish(&state);
            token
        };

        let result = self.remote.projects.delete(id).await;

        let mut state = self.lock_state();
        let owns = token.is_none_or(|t| self.fences.is_current(&t));
        match result {
            Ok(()) => {
                state.remove_summary(id);
                if !owns {
                    self.publish(&state);
                    drop(state);
                    self.note_superseded("delete");
                    return Ok(Outcome::Superseded);
                }
                if token.is_some() {
                    self.gate.discard();
                    state.clear_project();
                    self.persist_project_id(None);
                }
                self.publish(&state);
                info!(id, "project deleted");
                Ok(Outcome::Applied(()))
            },
            Err(e) => {
                warn!(id, error = %e, "delete failed");
                if !owns {
                    drop(state);
                    self.note_superseded("delete");
                    return Err(e.into());
                }
                if token.is_some() {
                    state.phase = Phase::Open;
                }
                state.record_remote_error("delete", &e);
                self.publish(&state);
                drop(state);
                if token.is_some() {
                    self.resume_autosave_if_dirty();
                }
                Err(e.into())
            },
        }
    }

    /// Copy a project remotely. The current project does not change.
    pub async fn duplicate(&self, id: &str, name: Option<&str>) -> Result<ProjectMeta> {
        self.start_operation()?;
        match self.remote.projects.duplicate(id, name).await {
            Ok(copy) => {
                let mut state = self.lock_state();
                state.upsert_summary(copy.summary());
                self.publish(&state);
                info!(source = id, id = %copy.id, name = %copy.name, "project duplicated");
                Ok(copy)
            },
            Err(e) => {
                warn!(id, error = %e, "duplicate failed");
                self.record_error("duplicate", &e);
                Err(e.into())
            },
        }
    }

    /// Reload the cached project list.
    pub async fn refresh_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.start_operation()?;
        match self.remote.projects.list().await {
            Ok(projects) => {
                let summaries: Vec<ProjectSummary> =
                    projects.iter().map(ProjectMeta::summary).collect();
                let mut state = self.lock_state();
                state.projects = summaries.clone();
                self.publish(&state);
                debug!(count = summaries.len(), "project list refreshed");
                Ok(summaries)
            },
            Err(e) => {
                warn!(error = %e, "listing projects failed");
                self.record_error("list", &e);
                Err(e.into())
            },
        }
    }

    // ── Working copy ────────────────────────────────────────────────────────

    /// Replace the working copy and schedule a write.
    ///
    /// Returns `false` without scheduling anything when `files` equals the
    /// working copy or the last synced content.
    pub fn update_files(self: &Arc<Self>, files: FileSystem) -> Result<bool> {
        let mut state = self.lock_state();
        if state.phase != Phase::Open {
            return Err(Error::NoProject);
        }
        if state.files == files {
            return Ok(false);
        }
        state.files = files;
        let dirty = state.is_dirty();
        let offline = state.offline;
        let token = self.fences.current(FenceResource::CurrentProject);
        self.publish(&state);
        drop(state);

        if !dirty {
            // Back to what the store holds.
            self.autosave.reset();
        } else if self.options.autosave_enabled && !offline {
            self.schedule_autosave(token);
        } else {
            trace!(offline, "working copy changed, autosave not scheduled");
        }
        Ok(dirty)
    }

    /// Write the working copy now instead of waiting for the timer.
    ///
    /// `Ok(None)` means there was nothing to write.
    pub async fn save(&self) -> Result<Option<WriteOutcome>> {
        let token = {
            let state = self.lock_state();
            if state.phase != Phase::Open {
                return Err(Error::NoProject);
            }
            if state.offline {
                return Err(Error::Offline);
            }
            self.fences.current(FenceResource::CurrentProject)
        };
        self.autosave
            .run_now(|| self.write_working_copy(token))
            .await
    }

    /// Overwrite the store with the pending local snapshot.
    pub async fn confirm_pending_sync(self: &Arc<Self>) -> Result<ConfirmedWrite> {
        let token = {
            let state = self.lock_state();
            if state.offline {
                return Err(Error::Offline);
            }
            self.gate.discard_unless(state.current_id());
            if !self.gate.is_pending() {
                return Err(Error::NoPendingSync);
            }
            self.fences.current(FenceResource::CurrentProject)
        };
        let fences = &self.fences;

        let result = self
            .autosave
            .exclusive(|| async {
                {
                    let mut state = self.lock_state();
                    state.writes_in_flight += 1;
                    self.publish(&state);
                }
                self.gate
                    .confirm(self.remote.projects.as_ref(), || fences.is_current(&token))
                    .await
            })
            .await;

        let mut state = self.lock_state();
        state.writes_in_flight = state.writes_in_flight.saturating_sub(1);
        let owns = self.fences.is_current(&token);
        match &result {
            Ok(confirmed) if owns && state.is_current(&confirmed.project_id) => {
                state.synced_files = confirmed.files.clone();
                state.base_version = confirmed.version;
                state.error = None;
            },
            Ok(_) => self.note_superseded("confirm_sync"),
            Err(Error::Remote(e)) if owns => state.record_remote_error("confirm_sync", e),
            Err(_) if !owns => self.gate.discard_unless(state.current_id()),
            Err(_) => {},
        }
        self.publish(&state);
        drop(state);

        if result.is_ok() {
            self.resume_autosave_if_dirty();
        }
        result
    }

    /// Drop the pending local snapshot and reload the store's copy.
    pub async fn cancel_pending_sync(&self) -> Result<Outcome<ProjectMeta>> {
        if self.lock_state().offline {
            return Err(Error::Offline);
        }
        let token = self.fences.current(FenceResource::CurrentProject);
        let record = {
            let state = self.lock_state();
            let record = self.gate.cancel().ok_or(Error::NoPendingSync)?;
            self.autosave.reset();
            // Writes started against the old base are stale now.
            self.fences.supersede(FenceResource::Sync);
            self.publish(&state);
            record
        };

        let result = self.remote.projects.get(&record.project_id).await;

        let mut state = self.lock_state();
        if !self.fences.is_current(&token) || !state.is_current(&record.project_id) {
            drop(state);
            self.note_superseded("cancel_sync");
            return Ok(Outcome::Superseded);
        }
        match result {
            Ok(meta) => {
                state.reload(meta.clone());
                self.publish(&state);
                info!(id = %meta.id, version = meta.version, "local changes dropped, remote copy loaded");
                Ok(Outcome::Applied(meta))
            },
            Err(e) => {
                warn!(id = %record.project_id, error = %e, "reloading remote copy failed");
                state.record_remote_error("cancel_sync", &e);
                self.publish(&state);
                Err(e.into())
            },
        }
    }

    // ── Git and context ─────────────────────────────────────────────────────

    /// Fetch git status for the current project.
    pub async fn refresh_git_status(&self) -> Result<Outcome<GitStatus>> {
        let target = self.current_target()?;
        self.refresh_git_with(target.token, &target.id).await
    }

    pub async fn git_init(&self) -> Result<Outcome<GitStatus>> {
        let target = self.current_target()?;
        if let Err(e) = self.remote.git.init(&target.id, &target.files).await {
            warn!(id = %target.id, error = %e, "git init failed");
            self.record_error_if_current(target.token, "git_init", &e);
            return Err(e.into());
        }
        info!(id = %target.id, "repository initialized");
        self.refresh_git_with(target.token, &target.id).await
    }

    /// Commit the working copy.
    pub async fn git_commit(&self, message: &str) -> Result<Outcome<GitStatus>> {
        if message.trim().is_empty() {
            return Err(Error::message("commit message must not be empty"));
        }
        let target = self.current_target()?;
        if let Err(e) = self
            .remote
            .git
            .commit(&target.id, message, &target.files)
            .await
        {
            warn!(id = %target.id, error = %e, "git commit failed");
            self.record_error_if_current(target.token, "git_commit", &e);
            return Err(e.into());
        }
        info!(id = %target.id, "changes committed");
        self.refresh_git_with(target.token, &target.id).await
    }

    /// Persist a partial AI context and merge it into the session's copy.
    pub async fn update_context(&self, patch: ProjectContext) -> Result<Outcome<ProjectContext>> {
        let target = self.current_target()?;
        if let Err(e) = self.remote.projects.save_context(&target.id, &patch).await {
            warn!(id = %target.id, error = %e, "saving context failed");
            self.record_error_if_current(target.token, "save_context", &e);
            return Err(e.into());
        }

        let mut state = self.lock_state();
        if !self.fences.is_current(&target.token) || !state.is_current(&target.id) {
            drop(state);
            self.note_superseded("save_context");
            return Ok(Outcome::Superseded);
        }
        let context = state.context.get_or_insert_with(ProjectContext::new);
        context.merge(&patch);
        let merged = context.clone();
        self.publish(&state);
        Ok(Outcome::Applied(merged))
    }

    // ── Internals ───────────────────────────────────────────────────────────

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Callers hold the state lock, so snapshots go out in mutation order.
    pub(crate) fn publish(&self, state: &SessionState) {
        self.updates
            .send_replace(state.snapshot(self.gate.pending()));
    }

    /// Offline check plus clearing the previous error.
    fn start_operation(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.offline {
            return Err(Error::Offline);
        }
        if state.error.take().is_some() {
            self.publish(&state);
        }
        Ok(())
    }

    fn current_target(&self) -> Result<Target> {
        let mut state = self.lock_state();
        if state.offline {
            return Err(Error::Offline);
        }
        if state.phase != Phase::Open {
            return Err(Error::NoProject);
        }
        let id = state
            .current_id()
            .map(str::to_string)
            .ok_or(Error::NoProject)?;
        let files = state.files.clone();
        if state.error.take().is_some() {
            self.publish(&state);
        }
        Ok(Target {
            token: self.fences.current(FenceResource::CurrentProject),
            id,
            files,
        })
    }

    fn begin_switch(&self) -> Result<FenceToken> {
        let mut state = self.lock_state();
        if state.offline {
            return Err(Error::Offline);
        }
        Ok(self.switch_locked(&mut state))
    }

    /// Start replacing the current project. Autosave is disarmed before the
    /// fence moves; the pending confirmation goes after it.
    pub(crate) fn switch_locked(&self, state: &mut SessionState) -> FenceToken {
        let token = self.replace_locked(state);
        self.gate.discard();
        self.publish(state);
        token
    }

    /// [`Self::switch_locked`] without touching the pending confirmation.
    /// Callers publish.
    fn replace_locked(&self, state: &mut SessionState) -> FenceToken {
        self.autosave.reset();
        let token = self.fences.begin(FenceResource::CurrentProject);
        self.fences.supersede(FenceResource::Sync);
        state.git_status = None;
        state.error = None;
        state.phase = Phase::Opening;
        token
    }

    pub(crate) async fn fetch_project(
        &self,
        id: &str,
    ) -> (quill_projects::Result<ProjectMeta>, Option<ProjectContext>) {
        let (meta, context) = tokio::join!(
            self.remote.projects.get(id),
            self.remote.projects.get_context(id)
        );
        let context = context.unwrap_or_else(|e| {
            warn!(id, error = %e, "context unavailable, opening without it");
            None
        });
        (meta, context)
    }

    pub(crate) fn adopt_locked(
        &self,
        state: &mut SessionState,
        meta: ProjectMeta,
        context: Option<ProjectContext>,
    ) {
        self.gate.discard();
        self.persist_project_id(Some(&meta.id));
        state.adopt(meta, context);
        state.error = None;
    }

    pub(crate) fn persisted_project_id(&self) -> Option<String> {
        match self.prefs.get_project_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not read last project id");
                None
            },
        }
    }

    pub(crate) fn persist_project_id(&self, id: Option<&str>) {
        if let Err(e) = self.prefs.set_project_id(id) {
            warn!(error = %e, "could not persist last project id");
        }
    }

    pub(crate) fn note_superseded(&self, operation: &'static str) {
        #[cfg(feature = "metrics")]
        metrics::counter!(sync_metrics::SUPERSEDED_TOTAL, "operation" => operation).increment(1);
        debug!(operation, "result superseded, discarded");
    }

    fn record_error(&self, operation: &str, error: &quill_projects::Error) {
        let mut state = self.lock_state();
        state.record_remote_error(operation, error);
        self.publish(&state);
    }

    fn record_error_if_current(
        &self,
        token: FenceToken,
        operation: &str,
        error: &quill_projects::Error,
    ) {
        let mut state = self.lock_state();
        if self.fences.is_current(&token) {
            state.record_remote_error(operation, error);
            self.publish(&state);
        }
    }

    /// Best effort: failures are logged and the status stays unknown.
    pub(crate) fn spawn_git_refresh(self: &Arc<Self>, token: FenceToken, id: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = session.refresh_git_with(token, &id).await {
                debug!(id = %id, error = %e, "background git refresh failed");
            }
        });
    }

    async fn refresh_git_with(&self, token: FenceToken, id: &str) -> Result<Outcome<GitStatus>> {
        let result = self.remote.git.status(id).await;

        let mut state = self.lock_state();
        if !self.fences.is_current(&token) || !state.is_current(id) {
            drop(state);
            self.note_superseded("git_status");
            return Ok(Outcome::Superseded);
        }
        match result {
            Ok(status) => {
                state.git_status = Some(status.clone());
                self.publish(&state);
                Ok(Outcome::Applied(status))
            },
            Err(e) => {
                if e.is_unavailable() && !state.offline {
                    state.offline = true;
                    self.publish(&state);
                }
                warn!(id, error = %e, "git status refresh failed");
                Err(e.into())
            },
        }
    }

    pub(crate) fn schedule_autosave(self: &Arc<Self>, token: FenceToken) {
        let session = Arc::downgrade(self);
        self.autosave.schedule(move || async move {
            let Some(session) = session.upgrade() else {
                return;
            };
            match session.write_working_copy(token).await {
                Ok(Some(outcome)) => debug!(?outcome, "autosave finished"),
                Ok(None) => trace!("autosave skipped, working copy clean"),
                Err(e) => warn!(error = %e, "autosave failed"),
            }
        });
    }

    /// Re-arm autosave for unsynced edits, e.g. after the store comes back.
    pub(crate) fn resume_autosave_if_dirty(self: &Arc<Self>) -> bool {
        if !self.options.autosave_enabled {
            return false;
        }
        let token = {
            let state = self.lock_state();
            if state.phase != Phase::Open || state.offline || !state.is_dirty() {
                return false;
            }
            self.fences.current(FenceResource::CurrentProject)
        };
        self.schedule_autosave(token);
        true
    }

    /// Push the working copy through the gate. Runs under the debouncer's
    /// write lock.
    async fn write_working_copy(&self, token: FenceToken) -> Result<Option<WriteOutcome>> {
        let request = {
            let mut state = self.lock_state();
            if !self.fences.is_current(&token) || state.phase != Phase::Open {
                return Ok(Some(WriteOutcome::Aborted(AbortReason::Superseded)));
            }
            let Some(id) = state.current_id().map(str::to_string) else {
                return Ok(Some(WriteOutcome::Aborted(AbortReason::Superseded)));
            };
            if state.offline {
                return Ok(Some(WriteOutcome::Aborted(AbortReason::Offline)));
            }
            if !state.is_dirty() {
                return Ok(None);
            }
            state.writes_in_flight += 1;
            self.publish(&state);
            WriteRequest {
                project_id: id,
                files: state.files.clone(),
                base_version: state.base_version,
            }
        };

        let sync = self.fences.current(FenceResource::Sync);
        let fences = &self.fences;
        let result = self
            .gate
            .attempt_write(self.remote.projects.as_ref(), request.clone(), || {
                fences.is_current(&token) && fences.is_current(&sync)
            })
            .await;

        let mut state = self.lock_state();
        state.writes_in_flight = state.writes_in_flight.saturating_sub(1);
        let owns = self.fences.is_current(&token)
            && self.fences.is_current(&sync)
            && state.is_current(&request.project_id);
        match &result {
            Ok(WriteOutcome::Written { version }) if owns => {
                state.synced_files = request.files;
                state.base_version = *version;
            },
            Ok(WriteOutcome::Written { .. }) | Ok(WriteOutcome::Aborted(AbortReason::Superseded)) => {
                self.note_superseded("sync");
            },
            Ok(WriteOutcome::ConfirmationRequired { remote_version }) => {
                info!(
                    id = %request.project_id,
                    remote_version,
                    "store changed underneath, waiting for confirmation"
                );
            },
            Ok(WriteOutcome::Aborted(_)) => {},
            Err(Error::Remote(e)) if owns => state.record_remote_error("sync", e),
            Err(_) => {},
        }
        self.publish(&state);
        drop(state);
        result.map(Some)
    }
}

impl Drop for ProjectSession {
    fn drop(&mut self) {
        let handle = self
            .health_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{prefs::MemoryPreferences, state::ErrorKind},
        quill_projects::{InjectedFailure, MemoryRemote, RemoteOp, file_system},
        serde_json::json,
    };

    fn setup() -> (Arc<MemoryRemote>, Arc<MemoryPreferences>, Arc<ProjectSession>) {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("p1", "One", file_system([("a.txt", "1")]));
        let prefs = Arc::new(MemoryPreferences::new());
        let session = ProjectSession::new(
            Remote::from_store(Arc::clone(&remote)),
            prefs.clone(),
            SessionOptions::default(),
        );
        (remote, prefs, session)
    }

    #[test]
    fn options_follow_config() {
        let mut config = QuillConfig::default();
        config.autosave.enabled = false;
        config.autosave.debounce_ms = 250;
        config.remote.health_interval_ms = 750;

        let options = SessionOptions::from(&config);
        assert!(!options.autosave_enabled);
        assert_eq!(options.autosave_delay, Duration::from_millis(250));
        assert_eq!(options.health_interval, Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn open_adopts_project_and_persists_id() {
        let (remote, prefs, session) = setup();
        remote.set_git_status("p1", GitStatus {
            initialized: true,
            branch: "main".into(),
            ..GitStatus::default()
        });

        let meta = session.open("p1").await.unwrap().applied().unwrap();
        assert_eq!(meta.name, "One");

        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some("p1"));
        assert_eq!(snap.files["a.txt"], "1");
        assert!(!snap.dirty);
        assert!(!snap.syncing);
        assert_eq!(prefs.stored().as_deref(), Some("p1"));

        // Background git refresh lands shortly after.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.snapshot().git_status.unwrap().branch, "main");
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_settles_empty_with_error() {
        let (_remote, prefs, session) = setup();
        session.open("p1").await.unwrap();
        assert_eq!(prefs.stored().as_deref(), Some("p1"));

        let err = session.open("missing").await.unwrap_err();
        assert!(matches!(err, Error::Remote(ref e) if e.is_not_found()));

        let snap = session.snapshot();
        assert!(!snap.is_open());
        assert!(snap.files.is_empty());
        let error = snap.error.unwrap();
        assert_eq!(error.kind, ErrorKind::RemoteRejected);
        assert_eq!(error.operation, "open");
        // p1 was torn down, so it is not reopened on the next start.
        assert_eq!(prefs.stored(), None);

        session.clear_error();
        assert!(session.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_keeps_previous_project() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        remote.set_failure(RemoteOp::Create, Some(InjectedFailure::Rejected(422)));

        let result = session
            .create(NewProject {
                name: "Two".into(),
                ..NewProject::default()
            })
            .await;
        assert!(result.is_err());

        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some("p1"));
        assert_eq!(snap.error.unwrap().operation, "create");
        // Editing still works.
        assert!(session.update_files(file_system([("a.txt", "2")])).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_keeps_pending_confirmation() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        remote.external_write("p1", file_system([("a.txt", "theirs")]));
        session.update_files(file_system([("a.txt", "ours")])).unwrap();
        assert_eq!(
            session.save().await.unwrap(),
            Some(WriteOutcome::ConfirmationRequired { remote_version: 2 })
        );

        remote.set_failure(RemoteOp::Create, Some(InjectedFailure::Rejected(422)));
        let result = session
            .create(NewProject {
                name: "Two".into(),
                ..NewProject::default()
            })
            .await;
        assert!(result.is_err());

        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some("p1"));
        assert_eq!(snap.pending_sync.unwrap().local["a.txt"], "ours");

        let confirmed = session.confirm_pending_sync().await.unwrap();
        assert_eq!(confirmed.version, 3);
        assert_eq!(remote.files("p1").unwrap()["a.txt"], "ours");
    }

    #[tokio::test(start_paused = true)]
    async fn created_project_replaces_pending_confirmation() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        remote.external_write("p1", file_system([("a.txt", "theirs")]));
        session.update_files(file_system([("a.txt", "ours")])).unwrap();
        session.save().await.unwrap();
        assert!(session.pending_sync().is_some());

        let meta = session
            .create(NewProject {
                name: "Two".into(),
                ..NewProject::default()
            })
            .await
            .unwrap()
            .applied()
            .unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some(meta.id.as_str()));
        assert!(snap.pending_sync.is_none());
        assert!(matches!(
            session.confirm_pending_sync().await,
            Err(Error::NoPendingSync)
        ));
        assert_eq!(remote.files("p1").unwrap()["a.txt"], "theirs");
    }

    #[tokio::test(start_paused = true)]
    async fn update_files_ignores_unchanged_content() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();

        assert!(!session.update_files(file_system([("a.txt", "1")])).unwrap());
        assert!(session.update_files(file_system([("a.txt", "2")])).unwrap());
        assert!(!session.update_files(file_system([("a.txt", "2")])).unwrap());
        // Reverting to the synced content disarms the pending write.
        assert!(!session.update_files(file_system([("a.txt", "1")])).unwrap());

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(remote.write_count("p1"), 0);
        assert!(!session.snapshot().dirty);
    }

    #[tokio::test]
    async fn update_files_without_project_is_rejected() {
        let (_remote, _prefs, session) = setup();
        assert!(matches!(
            session.update_files(file_system([("a.txt", "x")])),
            Err(Error::NoProject)
        ));
        assert!(matches!(session.save().await, Err(Error::NoProject)));
    }

    #[tokio::test(start_paused = true)]
    async fn save_writes_immediately_and_disarms_timer() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        session.update_files(file_system([("a.txt", "2")])).unwrap();

        let outcome = session.save().await.unwrap();
        assert_eq!(outcome, Some(WriteOutcome::Written { version: 2 }));
        assert_eq!(remote.write_count("p1"), 1);
        assert!(!session.snapshot().dirty);

        // Nothing left to write.
        assert_eq!(session.save().await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(remote.write_count("p1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_sync_reloads_remote_copy() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        remote.external_write("p1", file_system([("a.txt", "theirs")]));

        session.update_files(file_system([("a.txt", "ours")])).unwrap();
        let outcome = session.save().await.unwrap();
        assert_eq!(outcome, Some(WriteOutcome::ConfirmationRequired { remote_version: 2 }));
        assert!(session.snapshot().pending_sync.is_some());

        let meta = session.cancel_pending_sync().await.unwrap().applied().unwrap();
        assert_eq!(meta.version, 2);

        let snap = session.snapshot();
        assert!(snap.pending_sync.is_none());
        assert_eq!(snap.files["a.txt"], "theirs");
        assert!(!snap.dirty);
        assert!(matches!(
            session.cancel_pending_sync().await,
            Err(Error::NoPendingSync)
        ));

        // The next edit writes against the reloaded revision.
        session.update_files(file_system([("a.txt", "again")])).unwrap();
        assert_eq!(
            session.save().await.unwrap(),
            Some(WriteOutcome::Written { version: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_is_recorded() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();
        remote.set_failure(RemoteOp::UpdateFiles, Some(InjectedFailure::Rejected(500)));

        session.update_files(file_system([("a.txt", "2")])).unwrap();
        assert!(session.save().await.is_err());

        let snap = session.snapshot();
        assert!(snap.dirty);
        assert_eq!(snap.error.unwrap().operation, "sync");
        assert!(!snap.offline);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_leaves_current_project_alone() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();

        let copy = session.duplicate("p1", None).await.unwrap();
        assert_eq!(copy.name, "One (copy)");
        assert_eq!(remote.files(&copy.id).unwrap()["a.txt"], "1");

        let snap = session.snapshot();
        assert_eq!(snap.current_id(), Some("p1"));
        assert!(snap.projects.iter().any(|p| p.id == copy.id));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_projects_replaces_cached_list() {
        let (remote, _prefs, session) = setup();
        remote.seed("p2", "Two", FileSystem::new());

        let list = session.refresh_projects().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(session.snapshot().projects.len(), 2);

        remote.set_failure(RemoteOp::List, Some(InjectedFailure::Unavailable));
        assert!(session.refresh_projects().await.is_err());
        let snap = session.snapshot();
        assert!(snap.offline);
        assert_eq!(snap.projects.len(), 2);
        assert_eq!(snap.error.unwrap().kind, ErrorKind::RemoteUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn git_init_and_commit() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();

        // Committing before init is refused by the store.
        assert!(session.git_commit("first").await.is_err());
        assert_eq!(session.snapshot().error.unwrap().operation, "git_commit");

        let status = session.git_init().await.unwrap().applied().unwrap();
        assert!(status.initialized);
        assert!(session.snapshot().error.is_none());

        session.git_commit("first").await.unwrap();
        assert_eq!(remote.commits("p1"), vec!["first".to_string()]);
        assert!(session.git_commit("   ").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn update_context_merges_and_persists() {
        let (remote, _prefs, session) = setup();
        session.open("p1").await.unwrap();

        let mut patch = ProjectContext::new();
        patch.insert("summary", json!("a todo app"));
        session.update_context(patch).await.unwrap();

        let mut patch = ProjectContext::new();
        patch.insert("stack", json!(["rust"]));
        let merged = session.update_context(patch).await.unwrap().applied().unwrap();

        assert_eq!(merged.get("summary"), Some(&json!("a todo app")));
        assert_eq!(merged.get("stack"), Some(&json!(["rust"])));
        assert_eq!(remote.context("p1"), Some(merged.clone()));
        assert_eq!(session.snapshot().context, Some(merged));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_state_changes() {
        let (_remote, _prefs, session) = setup();
        let mut rx = session.subscribe();

        session.open("p1").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().current_id(), Some("p1"));

        session.close();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_open());
    }
}

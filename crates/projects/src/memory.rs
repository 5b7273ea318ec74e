//! In-process remote store.
//!
//! Backs the session tests and the CLI demo. Every call can be delayed or
//! made to fail per operation (and per project id), which is how the race
//! scenarios are reproduced deterministically.

use std::{
    collections::HashMap,
    io,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {async_trait::async_trait, tracing::debug};

use crate::{
    Error, Result,
    remote::{GitApi, HealthCheck, ProjectApi},
    types::{FileSystem, GitStatus, NewProject, ProjectContext, ProjectMeta, SaveOutcome},
};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Operations that can be delayed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Get,
    List,
    Delete,
    Duplicate,
    UpdateFiles,
    SaveContext,
    GetContext,
    GitStatus,
    GitInit,
    GitCommit,
}

/// Failure injected into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Behave as if the store could not be reached.
    Unavailable,
    /// Respond with a server-side rejection carrying this status.
    Rejected(u16),
}

#[derive(Default)]
struct Inner {
    projects: HashMap<String, ProjectMeta>,
    contexts: HashMap<String, ProjectContext>,
    git: HashMap<String, GitStatus>,
    commits: HashMap<String, Vec<String>>,
    writes: HashMap<String, usize>,
    delays: HashMap<(RemoteOp, Option<String>), Duration>,
    failures: HashMap<RemoteOp, InjectedFailure>,
    calls: HashMap<RemoteOp, usize>,
    healthy: bool,
}

/// In-memory store backed by `HashMap`s. No persistence.
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                healthy: true,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a project directly, bypassing `create`. Returns the stored copy.
    pub fn seed(&self, id: &str, name: &str, files: FileSystem) -> ProjectMeta {
        let now = now_ms();
        let meta = ProjectMeta {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            files,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.lock().projects.insert(id.to_string(), meta.clone());
        meta
    }

    /// Delay every call of `op`.
    pub fn set_delay(&self, op: RemoteOp, delay: Duration) {
        self.lock().delays.insert((op, None), delay);
    }

    /// Delay calls of `op` that target project `id`. Takes precedence over
    /// [`Self::set_delay`].
    pub fn set_delay_for(&self, op: RemoteOp, id: &str, delay: Duration) {
        self.lock().delays.insert((op, Some(id.to_string())), delay);
    }

    /// Make every call of `op` fail until cleared with `None`.
    pub fn set_failure(&self, op: RemoteOp, failure: Option<InjectedFailure>) {
        let mut inner = self.lock();
        match failure {
            Some(f) => {
                inner.failures.insert(op, f);
            },
            None => {
                inner.failures.remove(&op);
            },
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().healthy = healthy;
    }

    /// Simulate another client writing to the project.
    pub fn external_write(&self, id: &str, files: FileSystem) {
        let mut inner = self.lock();
        if let Some(p) = inner.projects.get_mut(id) {
            p.files = files;
            p.version += 1;
            p.updated_at = now_ms();
        }
    }

    /// Current stored files of a project.
    pub fn files(&self, id: &str) -> Option<FileSystem> {
        self.lock().projects.get(id).map(|p| p.files.clone())
    }

    pub fn version(&self, id: &str) -> Option<u64> {
        self.lock().projects.get(id).map(|p| p.version)
    }

    /// Number of accepted `update_files` calls for a project.
    pub fn write_count(&self, id: &str) -> usize {
        self.lock().writes.get(id).copied().unwrap_or(0)
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn set_git_status(&self, id: &str, status: GitStatus) {
        self.lock().git.insert(id.to_string(), status);
    }

    pub fn commits(&self, id: &str) -> Vec<String> {
        self.lock().commits.get(id).cloned().unwrap_or_default()
    }

    pub fn context(&self, id: &str) -> Option<ProjectContext> {
        self.lock().contexts.get(id).cloned()
    }

    /// Record the call, then wait out any configured delay and apply any
    /// injected failure.
    async fn enter(&self, op: RemoteOp, operation: &'static str, id: Option<&str>) -> Result<()> {
        let (delay, failure) = {
            let mut inner = self.lock();
            *inner.calls.entry(op).or_default() += 1;
            let delay = id
                .and_then(|id| inner.delays.get(&(op, Some(id.to_string()))))
                .or_else(|| inner.delays.get(&(op, None)))
                .copied();
            (delay, inner.failures.get(&op).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(InjectedFailure::Unavailable) => Err(Error::unavailable(
                operation,
                io::Error::new(io::ErrorKind::ConnectionRefused, "store offline"),
            )),
            Some(InjectedFailure::Rejected(status)) => {
                Err(Error::rejected(operation, status, "injected failure"))
            },
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectApi for MemoryRemote {
    async fn create(&self, project: NewProject) -> Result<ProjectMeta> {
        self.enter(RemoteOp::Create, "create", None).await?;
        let now = now_ms();
        let meta = ProjectMeta {
            id: uuid::Uuid::new_v4().to_string(),
            name: project.name,
            description: project.description,
            files: project.files,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.lock().projects.insert(meta.id.clone(), meta.clone());
        debug!(id = %meta.id, "memory remote: project created");
        Ok(meta)
    }

    async fn get(&self, id: &str) -> Result<ProjectMeta> {
        self.enter(RemoteOp::Get, "get", Some(id)).await?;
        self.lock()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    async fn list(&self) -> Result<Vec<ProjectMeta>> {
        self.enter(RemoteOp::List, "list", None).await?;
        let mut projects: Vec<ProjectMeta> = self.lock().projects.values().cloned().collect();
        projects.sort_by_key(|p| std::cmp::Reverse(p.updated_at));
        Ok(projects)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.enter(RemoteOp::Delete, "delete", Some(id)).await?;
        let mut inner = self.lock();
        if inner.projects.remove(id).is_none() {
            return Err(Error::not_found(id));
        }
        inner.contexts.remove(id);
        inner.git.remove(id);
        Ok(())
    }

    async fn duplicate(&self, id: &str, name: Option<&str>) -> Result<ProjectMeta> {
        self.enter(RemoteOp::Duplicate, "duplicate", Some(id))
            .await?;
        let mut inner = self.lock();
        let source = inner
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))?;
        let now = now_ms();
        let copy = ProjectMeta {
            id: uuid::Uuid::new_v4().to_string(),
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} (copy)", source.name)),
            description: source.description,
            files: source.files,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        if let Some(ctx) = inner.contexts.get(id).cloned() {
            inner.contexts.insert(copy.id.clone(), ctx);
        }
        inner.projects.insert(copy.id.clone(), copy.clone());
        Ok(copy)
    }

    async fn update_files(
        &self,
        id: &str,
        files: &FileSystem,
        if_version: Option<u64>,
    ) -> Result<SaveOutcome> {
        self.enter(RemoteOp::UpdateFiles, "update_files", Some(id))
            .await?;
        let mut inner = self.lock();
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(id))?;
        if let Some(expected) = if_version
            && expected != project.version
        {
            return Ok(SaveOutcome::Conflict {
                remote_version: project.version,
            });
        }
        project.files = files.clone();
        project.version += 1;
        project.updated_at = now_ms();
        let version = project.version;
        *inner.writes.entry(id.to_string()).or_default() += 1;
        Ok(SaveOutcome::Saved { version })
    }

    async fn save_context(&self, id: &str, patch: &ProjectContext) -> Result<()> {
        self.enter(RemoteOp::SaveContext, "save_context", Some(id))
            .await?;
        let mut inner = self.lock();
        if !inner.projects.contains_key(id) {
            return Err(Error::not_found(id));
        }
        inner.contexts.entry(id.to_string()).or_default().merge(patch);
        Ok(())
    }

    async fn get_context(&self, id: &str) -> Result<Option<ProjectContext>> {
        self.enter(RemoteOp::GetContext, "get_context", Some(id))
            .await?;
        Ok(self.lock().contexts.get(id).cloned())
    }
}

#[async_trait]
impl GitApi for MemoryRemote {
    async fn status(&self, id: &str) -> Result<GitStatus> {
        self.enter(RemoteOp::GitStatus, "git_status", Some(id))
            .await?;
        Ok(self.lock().git.get(id).cloned().unwrap_or_default())
    }

    async fn init(&self, id: &str, _files: &FileSystem) -> Result<()> {
        self.enter(RemoteOp::GitInit, "git_init", Some(id)).await?;
        self.lock().git.insert(id.to_string(), GitStatus {
            initialized: true,
            branch: "main".into(),
            ..GitStatus::default()
        });
        Ok(())
    }

    async fn commit(&self, id: &str, message: &str, _files: &FileSystem) -> Result<()> {
        self.enter(RemoteOp::GitCommit, "git_commit", Some(id))
            .await?;
        let mut inner = self.lock();
        if !inner.git.get(id).is_some_and(|g| g.initialized) {
            return Err(Error::rejected("git_commit", 409, "repository not initialized"));
        }
        inner
            .commits
            .entry(id.to_string())
            .or_default()
            .push(message.to_string());
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for MemoryRemote {
    async fn check_health(&self) -> bool {
        self.lock().healthy
    }
}

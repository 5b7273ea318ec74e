//! Boundary traits for the remote project store.
//!
//! The session engine only talks to the store through these traits, so the
//! transport ([`crate::HttpRemote`]) and the in-process store used in tests
//! ([`crate::MemoryRemote`]) are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Result,
    types::{FileSystem, GitStatus, NewProject, ProjectContext, ProjectMeta, SaveOutcome},
};

/// Project CRUD, file writes, and AI context persistence.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    async fn create(&self, project: NewProject) -> Result<ProjectMeta>;
    async fn get(&self, id: &str) -> Result<ProjectMeta>;
    async fn list(&self) -> Result<Vec<ProjectMeta>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn duplicate(&self, id: &str, name: Option<&str>) -> Result<ProjectMeta>;

    /// Replace the stored files.
    ///
    /// With `if_version = Some(v)` the write only lands when the stored
    /// revision is still `v`; otherwise the store answers
    /// [`SaveOutcome::Conflict`] and leaves its content untouched.
    /// `None` writes unconditionally.
    async fn update_files(
        &self,
        id: &str,
        files: &FileSystem,
        if_version: Option<u64>,
    ) -> Result<SaveOutcome>;

    async fn save_context(&self, id: &str, patch: &ProjectContext) -> Result<()>;
    async fn get_context(&self, id: &str) -> Result<Option<ProjectContext>>;
}

/// Version-control operations on a stored project.
#[async_trait]
pub trait GitApi: Send + Sync {
    async fn status(&self, id: &str) -> Result<GitStatus>;
    async fn init(&self, id: &str, files: &FileSystem) -> Result<()>;
    async fn commit(&self, id: &str, message: &str, files: &FileSystem) -> Result<()>;
}

/// Reachability check, polled on a fixed interval.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check_health(&self) -> bool;
}

/// The three store facets bundled for injection into the session.
#[derive(Clone)]
pub struct Remote {
    pub projects: Arc<dyn ProjectApi>,
    pub git: Arc<dyn GitApi>,
    pub health: Arc<dyn HealthCheck>,
}

impl Remote {
    pub fn new(
        projects: Arc<dyn ProjectApi>,
        git: Arc<dyn GitApi>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            projects,
            git,
            health,
        }
    }

    /// Use one implementation for all three facets.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProjectApi + GitApi + HealthCheck + 'static,
    {
        Self {
            projects: store.clone(),
            git: store.clone(),
            health: store,
        }
    }
}

//! Project synchronization engine.
//!
//! [`ProjectSession`] owns the single in-memory working copy of a project and
//! keeps it consistent with the remote store while open, create, close,
//! delete, restoration, and autosave race each other. The pieces it is built
//! from are usable on their own:
//!
//! - [`fence`]: per-resource operation tokens for discarding stale results
//! - [`autosave`]: single-slot debounced writes
//! - [`gate`]: compare-and-set writes that stop for a decision on conflict
//! - [`prefs`]: the persisted "last opened project"

pub mod autosave;
pub mod error;
pub mod fence;
pub mod gate;
mod health;
pub mod prefs;
pub mod restore;
pub mod session;
pub mod state;
#[cfg(feature = "metrics")]
pub mod sync_metrics;

pub use {
    autosave::AutosaveDebouncer,
    error::{Error, Result},
    fence::{FenceResource, FenceToken, OperationFences},
    gate::{AbortReason, ConfirmedWrite, SyncConfirmation, SyncGate, WriteOutcome, WriteRequest},
    prefs::{FilePreferences, MemoryPreferences, PreferenceStore},
    restore::RestoreOutcome,
    session::{Outcome, ProjectSession, SessionOptions},
    state::{ErrorKind, SessionError, SessionSnapshot},
};

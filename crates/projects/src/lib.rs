//! Project data model and the remote store boundary.
//!
//! A project is a flat set of text files plus version-control metadata kept
//! by a remote store. This crate defines the shapes exchanged with that store
//! and two implementations of the client side: [`HttpRemote`] for a real
//! server and [`MemoryRemote`] for tests and demos.

pub mod error;
pub mod http;
pub mod memory;
pub mod remote;
pub mod types;

pub use {
    error::{Error, Result},
    http::HttpRemote,
    memory::{InjectedFailure, MemoryRemote, RemoteOp},
    remote::{GitApi, HealthCheck, ProjectApi, Remote},
    types::{
        FileSystem, GitStatus, NewProject, ProjectContext, ProjectMeta, ProjectSummary,
        SaveOutcome, file_system,
    },
};

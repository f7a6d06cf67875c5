//! Kiln build orchestration
//!
//! Turns a resolved dependency graph into committed binary artifacts:
//! - Parallel, dependency-ordered build scheduling
//! - Process execution with per-stage timeouts
//! - An on-disk artifact store keyed by package identity
//! - Relocatable consumption metadata extracted from install trees

pub mod coordinator;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod store;

// Re-export main types
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{BuildFailed, JobRecord, JobStatus, MaterializeReport, SkippedJob};
pub use executor::SystemExecutor;
pub use metadata::{
    Artifact, STORAGE_ROOT_DECLARATION, STORAGE_ROOT_TOKEN, STORAGE_ROOT_VAR,
};
pub use store::{ArtifactStore, Claim, ClaimGuard, StoreError, StoreResult};

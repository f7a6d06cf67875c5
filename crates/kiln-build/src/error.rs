//! Coordinator error and report types

use crate::metadata::Artifact;
use kiln_package::identity::PackageIdentity;
use kiln_package::recipe::{LifecycleCause, LifecycleError, LifecycleStage};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of one build job
#[derive(Debug, Error)]
#[error("build of {identity} failed at the {stage} stage: {cause}")]
pub struct BuildFailed {
    pub identity: PackageIdentity,
    pub stage: LifecycleStage,
    pub cause: LifecycleCause,
    /// Captured output of the failing stage, retained for diagnostics
    pub output: String,
}

impl BuildFailed {
    pub fn from_lifecycle(identity: PackageIdentity, error: LifecycleError) -> Self {
        let output = match &error.cause {
            LifecycleCause::NonZeroExit { output, .. } => output.clone(),
            _ => String::new(),
        };
        Self {
            identity,
            stage: error.stage,
            cause: error.cause,
            output,
        }
    }
}

/// A job never attempted because a dependency failed. `failed_dependency`
/// names the root-cause failure, not an intermediate skipped job.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("skipped {identity}: dependency {failed_dependency} failed")]
pub struct SkippedJob {
    pub identity: PackageIdentity,
    pub failed_dependency: PackageIdentity,
}

/// Terminal state of one build job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Reused from the store without running any stage
    Cached,
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cached => "cached",
        }
    }
}

/// Per-job record in the aggregate report
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub identity: PackageIdentity,
    pub status: JobStatus,
    pub duration: Duration,
}

/// Aggregate outcome of materializing a dependency graph. Independent
/// branches keep building past a failure, so a report can hold artifacts
/// and failures at once.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub artifacts: HashMap<PackageIdentity, Artifact>,
    pub failures: Vec<BuildFailed>,
    pub skipped: Vec<SkippedJob>,
    /// One record per graph node, in topological order
    pub jobs: Vec<JobRecord>,
}

impl MaterializeReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn artifact(&self, identity: &PackageIdentity) -> Option<&Artifact> {
        self.artifacts.get(identity)
    }
}

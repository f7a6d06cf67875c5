//! Kiln package model
//!
//! Recipes, option schemas, settings normalization, package identity
//! fingerprints and dependency resolution. This crate computes *what* to
//! build and in which order; executing builds is `kiln-build`'s job.

pub mod context;
pub mod graph;
pub mod identity;
pub mod manifest;
pub mod options;
pub mod recipe;
pub mod resolver;
pub mod settings;

pub use context::{BuildContext, ExecError, ExecOutput, ExecRequest, Executor};
pub use graph::{DependencyGraph, GraphNode};
pub use identity::{compute_identity, identity_of, PackageIdentity};
pub use manifest::{ManifestError, ManifestRecipe, RecipeManifest, RecipeMetadata, StageCommands};
pub use options::{BuildOptions, OptionError, OptionSchema, OptionSpec};
pub use recipe::{
    LifecycleCause, LifecycleError, LifecycleResult, LifecycleStage, Recipe, RecipeRegistry,
    Requirement,
};
pub use resolver::{ConstraintSource, Resolver, ResolverError};
pub use settings::{BuildType, Compiler, SettingKey, Settings};

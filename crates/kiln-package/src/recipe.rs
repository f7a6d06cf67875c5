//! The recipe model: how one unit of software is obtained, configured,
//! built, tested and packaged.

use crate::context::{BuildContext, ExecError, ExecOutput};
use crate::options::{BuildOptions, OptionSchema};
use crate::settings::{SettingKey, Settings};
use semver::{Version, VersionReq};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One named stage of a recipe's build sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleStage {
    FetchSource,
    Configure,
    Build,
    SelfTest,
    Package,
}

impl LifecycleStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchSource => "fetch-source",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::SelfTest => "self-test",
            Self::Package => "package",
        }
    }

    /// All stages in execution order
    pub fn all() -> [LifecycleStage; 5] {
        [
            Self::FetchSource,
            Self::Configure,
            Self::Build,
            Self::SelfTest,
            Self::Package,
        ]
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a lifecycle stage failed
#[derive(Debug, Error)]
pub enum LifecycleCause {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("'{command}' exited with status {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl LifecycleCause {
    /// Classify an invocation that completed with a nonzero status.
    pub fn non_zero_exit(command: String, output: &ExecOutput) -> Self {
        Self::NonZeroExit {
            command,
            code: output.exit_code,
            output: output.combined(),
        }
    }
}

impl From<ExecError> for LifecycleCause {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::MissingTool(tool) => Self::MissingTool(tool),
            ExecError::Timeout { command, timeout } => {
                Self::Timeout(format!("'{}' after {:?}", command, timeout))
            }
            ExecError::Io { error, .. } => Self::Io(error),
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct LifecycleError {
    pub stage: LifecycleStage,
    pub cause: LifecycleCause,
}

impl LifecycleError {
    pub fn new(stage: LifecycleStage, cause: impl Into<LifecycleCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    pub fn other(stage: LifecycleStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            cause: LifecycleCause::Other(message.into()),
        }
    }
}

pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

/// Declared dependency on another package
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub constraint: VersionReq,
}

impl Requirement {
    pub fn new(name: impl Into<String>, constraint: &str) -> Result<Self, semver::Error> {
        Ok(Self {
            name: name.into(),
            constraint: constraint.parse()?,
        })
    }

    /// Requirement pinned to exactly one version.
    pub fn exact(name: impl Into<String>, version: &Version) -> Self {
        Self {
            name: name.into(),
            constraint: VersionReq::parse(&format!("={}", version))
                .unwrap_or(VersionReq::STAR),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.constraint)
    }
}

/// A recipe describes how to obtain, configure, build, test and package one
/// unit of software. Recipes are read-only during resolution and building;
/// all mutable state reaches the hooks through the [`BuildContext`].
pub trait Recipe: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &Version;

    /// Declared configuration knobs
    fn options(&self) -> &OptionSchema;

    /// Settings axes that never influence this package's identity (a pure-C
    /// package excludes the C++ standard-library flavor, for example).
    fn excluded_settings(&self) -> &[SettingKey] {
        &[]
    }

    /// Build tools worth bootstrapping before the first stage. Installing
    /// them is best-effort; failures are warnings, never errors.
    fn bootstrap_tools(&self) -> &[String] {
        &[]
    }

    /// Declared requirements for the given configuration. Queried during
    /// resolution, before any build starts; must be side-effect free.
    fn requirements(&self, options: &BuildOptions, settings: &Settings) -> Vec<Requirement>;

    fn fetch_source(&self, ctx: &BuildContext) -> LifecycleResult;

    fn configure(&self, ctx: &BuildContext) -> LifecycleResult;

    fn build(&self, ctx: &BuildContext) -> LifecycleResult;

    /// Optional; orchestration policy may skip it globally without touching
    /// the recipe.
    fn self_test(&self, ctx: &BuildContext) -> LifecycleResult {
        let _ = ctx;
        Ok(())
    }

    fn package_install(&self, ctx: &BuildContext) -> LifecycleResult;

    /// Dispatch one stage. The coordinator drives these in the fixed
    /// [`LifecycleStage::all`] order.
    fn run_stage(&self, stage: LifecycleStage, ctx: &BuildContext) -> LifecycleResult {
        match stage {
            LifecycleStage::FetchSource => self.fetch_source(ctx),
            LifecycleStage::Configure => self.configure(ctx),
            LifecycleStage::Build => self.build(ctx),
            LifecycleStage::SelfTest => self.self_test(ctx),
            LifecycleStage::Package => self.package_install(ctx),
        }
    }
}

/// In-memory recipe registry: every known recipe, by name, with versions
/// kept sorted ascending.
#[derive(Default)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Vec<Arc<dyn Recipe>>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, recipe: Arc<dyn Recipe>) {
        let versions = self.recipes.entry(recipe.name().to_string()).or_default();
        versions.retain(|existing| existing.version() != recipe.version());
        versions.push(recipe);
        versions.sort_by(|a, b| a.version().cmp(b.version()));
    }

    pub fn versions(&self, name: &str) -> Option<&[Arc<dyn Recipe>]> {
        self.recipes.get(name).map(|v| v.as_slice())
    }

    /// The maximum registered version of `name` satisfying every constraint,
    /// or `None` when the constraints are jointly unsatisfiable here.
    pub fn find_max_satisfying(
        &self,
        name: &str,
        constraints: &[VersionReq],
    ) -> Option<Arc<dyn Recipe>> {
        self.recipes.get(name)?.iter().rev().find_map(|recipe| {
            constraints
                .iter()
                .all(|req| req.matches(recipe.version()))
                .then(|| Arc::clone(recipe))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.recipes.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.recipes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionSchema;

    struct Plain {
        name: String,
        version: Version,
        schema: OptionSchema,
    }

    impl Plain {
        fn new(name: &str, version: &str) -> Arc<dyn Recipe> {
            Arc::new(Self {
                name: name.to_string(),
                version: version.parse().unwrap(),
                schema: OptionSchema::new(),
            })
        }
    }

    impl Recipe for Plain {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &Version {
            &self.version
        }

        fn options(&self) -> &OptionSchema {
            &self.schema
        }

        fn requirements(&self, _: &BuildOptions, _: &Settings) -> Vec<Requirement> {
            Vec::new()
        }

        fn fetch_source(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn configure(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn build(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn package_install(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }
    }

    #[test]
    fn test_stage_order() {
        let stages = LifecycleStage::all();
        assert_eq!(stages[0], LifecycleStage::FetchSource);
        assert_eq!(stages[4], LifecycleStage::Package);
        assert_eq!(LifecycleStage::SelfTest.name(), "self-test");
    }

    #[test]
    fn test_requirement_display() {
        let req = Requirement::new("zlib", "^1.2").unwrap();
        assert_eq!(req.to_string(), "zlib ^1.2");
    }

    #[test]
    fn test_requirement_exact() {
        let version: Version = "1.2.11".parse().unwrap();
        let req = Requirement::exact("zlib", &version);
        assert!(req.constraint.matches(&version));
        assert!(!req.constraint.matches(&"1.2.12".parse().unwrap()));
    }

    #[test]
    fn test_registry_max_satisfying() {
        let mut registry = RecipeRegistry::new();
        registry.register(Plain::new("zlib", "1.2.8"));
        registry.register(Plain::new("zlib", "1.2.11"));
        registry.register(Plain::new("zlib", "2.0.0"));

        let picked = registry
            .find_max_satisfying("zlib", &["^1.2".parse().unwrap()])
            .unwrap();
        assert_eq!(picked.version().to_string(), "1.2.11");

        let unconstrained = registry.find_max_satisfying("zlib", &[]).unwrap();
        assert_eq!(unconstrained.version().to_string(), "2.0.0");

        assert!(registry
            .find_max_satisfying("zlib", &["^3.0".parse().unwrap()])
            .is_none());
        assert!(registry.find_max_satisfying("libpng", &[]).is_none());
    }

    #[test]
    fn test_registry_reregister_replaces_version() {
        let mut registry = RecipeRegistry::new();
        registry.register(Plain::new("zlib", "1.2.11"));
        registry.register(Plain::new("zlib", "1.2.11"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["zlib"]);
    }

    #[test]
    fn test_lifecycle_cause_from_exec_error() {
        let cause: LifecycleCause = ExecError::MissingTool("make".to_string()).into();
        assert!(matches!(cause, LifecycleCause::MissingTool(tool) if tool == "make"));

        let cause: LifecycleCause = ExecError::Timeout {
            command: "make".to_string(),
            timeout: std::time::Duration::from_secs(1),
        }
        .into();
        assert!(matches!(cause, LifecycleCause::Timeout(_)));
    }
}

//! Declarative recipe manifests (kiln.toml)
//!
//! A manifest describes one package: metadata, option schema, requirements
//! and the argv vectors to run for each lifecycle stage. `into_recipe`
//! turns a parsed manifest into a runnable [`Recipe`].

use crate::context::BuildContext;
use crate::options::{OptionSchema, OptionSpec};
use crate::recipe::{
    LifecycleCause, LifecycleError, LifecycleResult, LifecycleStage, Recipe, Requirement,
};
use crate::options::BuildOptions;
use crate::settings::{SettingKey, Settings, UnknownSettingKey};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse recipe manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize recipe manifest: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to read manifest at {path}: {error}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("recipe '{recipe}': {error}")]
    UnknownSettingKey {
        recipe: String,
        #[source]
        error: UnknownSettingKey,
    },

    #[error("recipe '{recipe}': invalid requirement '{name} = \"{constraint}\"': {error}")]
    InvalidRequirement {
        recipe: String,
        name: String,
        constraint: String,
        #[source]
        error: semver::Error,
    },

    #[error("recipe '{recipe}': empty command in {stage} stage")]
    EmptyCommand {
        recipe: String,
        stage: LifecycleStage,
    },
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Recipe manifest as parsed from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeManifest {
    pub recipe: RecipeMetadata,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub stages: StageCommands,
}

/// `[recipe]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, rename = "exclude-settings")]
    pub exclude_settings: Vec<String>,
    #[serde(default, rename = "bootstrap-tools")]
    pub bootstrap_tools: Vec<String>,
}

/// `[stages]` table: one argv list per lifecycle stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCommands {
    #[serde(default)]
    pub fetch: Vec<Vec<String>>,
    #[serde(default)]
    pub configure: Vec<Vec<String>>,
    #[serde(default)]
    pub build: Vec<Vec<String>>,
    #[serde(default)]
    pub test: Vec<Vec<String>>,
    #[serde(default)]
    pub package: Vec<Vec<String>>,
}

impl StageCommands {
    fn for_stage(&self, stage: LifecycleStage) -> &[Vec<String>] {
        match stage {
            LifecycleStage::FetchSource => &self.fetch,
            LifecycleStage::Configure => &self.configure,
            LifecycleStage::Build => &self.build,
            LifecycleStage::SelfTest => &self.test,
            LifecycleStage::Package => &self.package,
        }
    }
}

impl RecipeManifest {
    /// Parse a manifest from TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ManifestResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a manifest from a file
    pub fn from_file(path: &Path) -> ManifestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ManifestError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_str(&content)
    }

    /// Serialize back to TOML
    pub fn to_string(&self) -> ManifestResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the manifest and convert it into a runnable recipe.
    pub fn into_recipe(self) -> ManifestResult<ManifestRecipe> {
        let name = self.recipe.name.clone();

        let excluded = self
            .recipe
            .exclude_settings
            .iter()
            .map(|key| {
                key.parse::<SettingKey>()
                    .map_err(|error| ManifestError::UnknownSettingKey {
                        recipe: name.clone(),
                        error,
                    })
            })
            .collect::<ManifestResult<Vec<_>>>()?;

        let requires = self
            .requires
            .iter()
            .map(|(dep, constraint)| {
                Requirement::new(dep.clone(), constraint).map_err(|error| {
                    ManifestError::InvalidRequirement {
                        recipe: name.clone(),
                        name: dep.clone(),
                        constraint: constraint.clone(),
                        error,
                    }
                })
            })
            .collect::<ManifestResult<Vec<_>>>()?;

        for stage in LifecycleStage::all() {
            if self.stages.for_stage(stage).iter().any(Vec::is_empty) {
                return Err(ManifestError::EmptyCommand {
                    recipe: name,
                    stage,
                });
            }
        }

        let mut schema = OptionSchema::new();
        for (option, spec) in &self.options {
            schema.insert(option.clone(), spec.clone());
        }

        Ok(ManifestRecipe {
            meta: self.recipe,
            schema,
            excluded,
            requires,
            stages: self.stages,
        })
    }
}

/// A recipe backed by a parsed manifest: each lifecycle hook runs the
/// declared argv vectors through the context's executor.
#[derive(Debug)]
pub struct ManifestRecipe {
    meta: RecipeMetadata,
    schema: OptionSchema,
    excluded: Vec<SettingKey>,
    requires: Vec<Requirement>,
    stages: StageCommands,
}

impl ManifestRecipe {
    pub fn description(&self) -> Option<&str> {
        self.meta.description.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.meta.license.as_deref()
    }

    fn run_commands(&self, stage: LifecycleStage, ctx: &BuildContext) -> LifecycleResult {
        for argv in self.stages.for_stage(stage) {
            let substituted: Vec<String> =
                argv.iter().map(|arg| substitute(arg, ctx)).collect();
            let (program, args) = substituted
                .split_first()
                .ok_or_else(|| LifecycleError::other(stage, "empty command"))?;

            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = ctx
                .run(program, &arg_refs)
                .map_err(|err| LifecycleError::new(stage, err))?;

            if !output.success() {
                let command = std::iter::once(program.as_str())
                    .chain(arg_refs.iter().copied())
                    .collect::<Vec<_>>()
                    .join(" ");
                return Err(LifecycleError::new(
                    stage,
                    LifecycleCause::non_zero_exit(command, &output),
                ));
            }
        }

        Ok(())
    }
}

impl Recipe for ManifestRecipe {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn version(&self) -> &Version {
        &self.meta.version
    }

    fn options(&self) -> &OptionSchema {
        &self.schema
    }

    fn excluded_settings(&self) -> &[SettingKey] {
        &self.excluded
    }

    fn bootstrap_tools(&self) -> &[String] {
        &self.meta.bootstrap_tools
    }

    fn requirements(&self, _options: &BuildOptions, _settings: &Settings) -> Vec<Requirement> {
        // Declarative recipes state their requirements unconditionally.
        self.requires.clone()
    }

    fn fetch_source(&self, ctx: &BuildContext) -> LifecycleResult {
        self.run_commands(LifecycleStage::FetchSource, ctx)
    }

    fn configure(&self, ctx: &BuildContext) -> LifecycleResult {
        self.run_commands(LifecycleStage::Configure, ctx)
    }

    fn build(&self, ctx: &BuildContext) -> LifecycleResult {
        self.run_commands(LifecycleStage::Build, ctx)
    }

    fn self_test(&self, ctx: &BuildContext) -> LifecycleResult {
        self.run_commands(LifecycleStage::SelfTest, ctx)
    }

    fn package_install(&self, ctx: &BuildContext) -> LifecycleResult {
        self.run_commands(LifecycleStage::Package, ctx)
    }
}

/// Expand `${...}` placeholders in one manifest argument. Unknown
/// placeholders are left untouched so tool-native `${VAR}` syntax survives.
fn substitute(arg: &str, ctx: &BuildContext) -> String {
    let mut value = None;

    for (placeholder, replacement) in [
        ("${work_dir}", ctx.work_dir.display().to_string()),
        ("${install_dir}", ctx.install_dir.display().to_string()),
        ("${jobs}", ctx.jobs.to_string()),
        ("${name}", ctx.identity.name.clone()),
        ("${version}", ctx.identity.version.to_string()),
    ] {
        if arg.contains(placeholder) {
            let current = value.unwrap_or_else(|| arg.to_string());
            value = Some(current.replace(placeholder, &replacement));
        }
    }

    value.unwrap_or_else(|| arg.to_string())
}

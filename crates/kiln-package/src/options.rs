//! Option schema validation and resolution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum OptionError {
    #[error("unknown option '{name}' for package '{package}'")]
    UnknownOption { package: String, name: String },

    #[error("invalid value '{value}' for option '{name}' of package '{package}': allowed values are {allowed:?}")]
    InvalidValue {
        package: String,
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("option '{name}' for package '{package}' given more than once")]
    DuplicateOption { package: String, name: String },
}

pub type OptionResult<T> = Result<T, OptionError>;

/// Allowed values and default for one declared option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub values: Vec<String>,
    pub default: String,
}

/// Fully resolved option values for one package, keyed (and therefore
/// ordered) by option name. Insertion order of the request never survives
/// into a `BuildOptions`.
pub type BuildOptions = BTreeMap<String, String>;

/// The declared option schema of a recipe: option name to allowed values
/// and default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSchema {
    specs: BTreeMap<String, OptionSpec>,
}

impl OptionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an option (builder style). The default is expected to be one
    /// of the allowed values.
    pub fn with_option(
        mut self,
        name: impl Into<String>,
        values: &[&str],
        default: impl Into<String>,
    ) -> Self {
        self.specs.insert(
            name.into(),
            OptionSpec {
                values: values.iter().map(|v| v.to_string()).collect(),
                default: default.into(),
            },
        );
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: OptionSpec) {
        self.specs.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Option values with every option at its default.
    pub fn defaults(&self) -> BuildOptions {
        self.specs
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone()))
            .collect()
    }

    /// Validate requested values against the schema and fill unset options
    /// with their defaults. Fails fast on unknown options, disallowed values
    /// and repeated names; nothing downstream sees an unvalidated option.
    pub fn resolve(&self, package: &str, requested: &[(String, String)]) -> OptionResult<BuildOptions> {
        let mut resolved = self.defaults();

        let mut seen = Vec::new();
        for (name, value) in requested {
            let spec = self.specs.get(name).ok_or_else(|| OptionError::UnknownOption {
                package: package.to_string(),
                name: name.clone(),
            })?;

            if seen.contains(&name) {
                return Err(OptionError::DuplicateOption {
                    package: package.to_string(),
                    name: name.clone(),
                });
            }
            seen.push(name);

            if !spec.values.contains(value) {
                return Err(OptionError::InvalidValue {
                    package: package.to_string(),
                    name: name.clone(),
                    value: value.clone(),
                    allowed: spec.values.clone(),
                });
            }

            resolved.insert(name.clone(), value.clone());
        }

        Ok(resolved)
    }
}

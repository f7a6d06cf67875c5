//! Ambient build settings: the configuration axes shared by every package
//! in a build request (target platform, compiler, build variant).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Build variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Debug,
    Release,
}

impl BuildType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildType {
    type Err = UnknownBuildType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            other => Err(UnknownBuildType(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown build type '{0}', expected 'debug' or 'release'")]
pub struct UnknownBuildType(pub String);

/// Compiler identification. `libcxx` is the C++ standard-library flavor,
/// which pure-C packages typically exclude from their identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compiler {
    pub family: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libcxx: Option<String>,
}

impl Compiler {
    pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            version: version.into(),
            libcxx: None,
        }
    }

    pub fn with_libcxx(mut self, libcxx: impl Into<String>) -> Self {
        self.libcxx = Some(libcxx.into());
        self
    }
}

/// The settings tuple of a build request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    pub os: String,
    pub arch: String,
    pub build_type: BuildType,
    pub compiler: Compiler,
}

/// One axis of the settings tuple, as recipes refer to them when excluding
/// dimensions from their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Os,
    Arch,
    BuildType,
    CompilerFamily,
    CompilerVersion,
    CompilerLibcxx,
}

impl SettingKey {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Os => "os",
            Self::Arch => "arch",
            Self::BuildType => "build_type",
            Self::CompilerFamily => "compiler.family",
            Self::CompilerVersion => "compiler.version",
            Self::CompilerLibcxx => "compiler.libcxx",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = UnknownSettingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "os" => Ok(Self::Os),
            "arch" => Ok(Self::Arch),
            "build_type" => Ok(Self::BuildType),
            "compiler.family" => Ok(Self::CompilerFamily),
            "compiler.version" => Ok(Self::CompilerVersion),
            "compiler.libcxx" => Ok(Self::CompilerLibcxx),
            other => Err(UnknownSettingKey(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown setting key '{0}'")]
pub struct UnknownSettingKey(pub String);

impl Settings {
    pub fn new(
        os: impl Into<String>,
        arch: impl Into<String>,
        build_type: BuildType,
        compiler: Compiler,
    ) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            build_type,
            compiler,
        }
    }

    /// Settings for the machine running the orchestrator.
    pub fn host(build_type: BuildType, compiler: Compiler) -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH, build_type, compiler)
    }

    /// The entries that participate in identity fingerprinting, in a stable
    /// key order, minus any axis the recipe excludes. An unset `libcxx`
    /// contributes nothing, so settings with and without it collapse once a
    /// recipe excludes that axis.
    pub fn fingerprint_entries(&self, excluded: &[SettingKey]) -> Vec<(SettingKey, String)> {
        let keep = |key: SettingKey| !excluded.contains(&key);
        let mut entries = Vec::new();

        if keep(SettingKey::Os) {
            entries.push((SettingKey::Os, self.os.clone()));
        }
        if keep(SettingKey::Arch) {
            entries.push((SettingKey::Arch, self.arch.clone()));
        }
        if keep(SettingKey::BuildType) {
            entries.push((SettingKey::BuildType, self.build_type.name().to_string()));
        }
        if keep(SettingKey::CompilerFamily) {
            entries.push((SettingKey::CompilerFamily, self.compiler.family.clone()));
        }
        if keep(SettingKey::CompilerVersion) {
            entries.push((SettingKey::CompilerVersion, self.compiler.version.clone()));
        }
        if keep(SettingKey::CompilerLibcxx) {
            if let Some(libcxx) = &self.compiler.libcxx {
                entries.push((SettingKey::CompilerLibcxx, libcxx.clone()));
            }
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        Settings::new(
            "linux",
            "x86_64",
            BuildType::Release,
            Compiler::new("gcc", "12").with_libcxx("libstdc++11"),
        )
    }

    #[test]
    fn test_fingerprint_entries_full() {
        let entries = sample().fingerprint_entries(&[]);
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                SettingKey::Os,
                SettingKey::Arch,
                SettingKey::BuildType,
                SettingKey::CompilerFamily,
                SettingKey::CompilerVersion,
                SettingKey::CompilerLibcxx,
            ]
        );
    }

    #[test]
    fn test_fingerprint_entries_excluded_axis_absent() {
        let entries = sample().fingerprint_entries(&[SettingKey::CompilerLibcxx]);
        assert!(entries.iter().all(|(k, _)| *k != SettingKey::CompilerLibcxx));
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn test_fingerprint_entries_unset_libcxx_omitted() {
        let mut settings = sample();
        settings.compiler.libcxx = None;
        let entries = settings.fingerprint_entries(&[]);
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn test_setting_key_round_trip() {
        for key in [
            SettingKey::Os,
            SettingKey::Arch,
            SettingKey::BuildType,
            SettingKey::CompilerFamily,
            SettingKey::CompilerVersion,
            SettingKey::CompilerLibcxx,
        ] {
            assert_eq!(key.name().parse::<SettingKey>().unwrap(), key);
        }
        assert!("compiler".parse::<SettingKey>().is_err());
    }

    #[test]
    fn test_build_type_parse() {
        assert_eq!("debug".parse::<BuildType>().unwrap(), BuildType::Debug);
        assert_eq!("release".parse::<BuildType>().unwrap(), BuildType::Release);
        assert!("profile".parse::<BuildType>().is_err());
    }
}

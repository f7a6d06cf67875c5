//! Command implementations and the plumbing they share

pub mod build;
pub mod query;
pub mod resolve;

use anyhow::{anyhow, bail, Context, Result};
use kiln_package::manifest::RecipeManifest;
use kiln_package::recipe::{Recipe, RecipeRegistry};
use kiln_package::settings::{BuildType, Compiler, Settings};
use semver::{Version, VersionReq};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings axes shared by every command that resolves a graph
#[derive(clap::Args)]
pub struct SettingsFlags {
    /// Target operating system (defaults to the current platform)
    #[arg(long, env = "KILN_OS")]
    pub os: Option<String>,
    /// Target architecture (defaults to the current platform)
    #[arg(long, env = "KILN_ARCH")]
    pub arch: Option<String>,
    /// Build type: debug or release
    #[arg(long, value_name = "TYPE", default_value = "release")]
    pub build_type: String,
    /// Compiler family (gcc, clang, ...)
    #[arg(long, env = "KILN_COMPILER", default_value = "gcc")]
    pub compiler: String,
    /// Compiler version
    #[arg(long, env = "KILN_COMPILER_VERSION", default_value = "13")]
    pub compiler_version: String,
    /// C++ standard library flavor; unset for C-only toolchains
    #[arg(long)]
    pub libcxx: Option<String>,
}

pub fn settings_of(flags: &SettingsFlags) -> Result<Settings> {
    let build_type: BuildType = flags
        .build_type
        .parse()
        .map_err(|e| anyhow!("invalid --build-type: {e}"))?;

    let mut compiler = Compiler::new(&flags.compiler, &flags.compiler_version);
    if let Some(libcxx) = &flags.libcxx {
        compiler = compiler.with_libcxx(libcxx);
    }

    let os = flags
        .os
        .clone()
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    let arch = flags
        .arch
        .clone()
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());

    Ok(Settings::new(os, arch, build_type, compiler))
}

/// Parse repeated `-o key=value` flags
pub fn parse_options(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| anyhow!("invalid option '{entry}', expected KEY=VALUE"))
        })
        .collect()
}

/// Load every `*.toml` manifest in `dir` into a registry
pub fn load_registry(dir: &Path) -> Result<RecipeRegistry> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read recipe directory {}", dir.display()))?;

    let mut registry = RecipeRegistry::new();
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    for path in paths {
        let recipe = RecipeManifest::from_file(&path)
            .and_then(RecipeManifest::into_recipe)
            .with_context(|| format!("invalid recipe {}", path.display()))?;
        registry.register(Arc::new(recipe));
    }

    if registry.is_empty() {
        bail!("no recipes found in {}", dir.display());
    }
    Ok(registry)
}

/// Pick the root recipe named by `spec`: bare name takes the newest
/// version, `name/1.2.3` pins exactly, anything else after the slash is
/// a semver requirement.
pub fn select_root(registry: &RecipeRegistry, spec: &str) -> Result<Arc<dyn Recipe>> {
    let (name, requirement) = match spec.split_once('/') {
        Some((name, rest)) => {
            let req = match Version::parse(rest) {
                Ok(version) => VersionReq::parse(&format!("={version}"))
                    .map_err(|e| anyhow!("invalid version requirement '{rest}': {e}"))?,
                Err(_) => rest
                    .parse::<VersionReq>()
                    .map_err(|e| anyhow!("invalid version requirement '{rest}': {e}"))?,
            };
            (name, vec![req])
        }
        None => (spec, Vec::new()),
    };

    registry
        .find_max_satisfying(name, &requirement)
        .ok_or_else(|| anyhow!("no recipe satisfies '{spec}'"))
}

/// Store location: flag, then KILN_STORE (handled by clap), then
/// `~/.kiln/store`.
pub fn store_root(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(root) => Ok(root),
        None => dirs::home_dir()
            .map(|home| home.join(".kiln").join("store"))
            .ok_or_else(|| anyhow!("cannot determine home directory; pass --store")),
    }
}

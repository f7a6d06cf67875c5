//! Package identity fingerprints
//!
//! A `PackageIdentity` is the deterministic cache/storage key of one build
//! request: name, version, resolved options and the normalized settings
//! tuple, hashed. Settings axes a recipe excludes are dropped before
//! hashing, so builds differing only in an excluded axis collapse to a
//! single identity.

use crate::options::{BuildOptions, OptionResult};
use crate::recipe::Recipe;
use crate::settings::Settings;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters of the fingerprint kept for display and storage paths.
/// Hex length of the truncated fingerprint digest
pub const DIGEST_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub version: Version,
    pub digest: String,
}

impl PackageIdentity {
    /// `name/version` without the fingerprint, for human-facing messages.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.name, self.version, self.digest)
    }
}

/// Compute the canonical identity for a build request.
///
/// Pure function: equal recipe, options (in any insertion order) and
/// normalized settings always produce the same identity. Option values
/// outside the recipe's schema are rejected before anything is hashed.
pub fn compute_identity(
    recipe: &dyn Recipe,
    requested: &[(String, String)],
    settings: &Settings,
) -> OptionResult<PackageIdentity> {
    let options = recipe.options().resolve(recipe.name(), requested)?;
    Ok(identity_of(recipe, &options, settings))
}

/// Identity for already-validated options. The resolver uses this after
/// resolving options once up front.
pub fn identity_of(recipe: &dyn Recipe, options: &BuildOptions, settings: &Settings) -> PackageIdentity {
    let mut hasher = Sha256::new();

    // Length-prefix-free framing: NUL separators between fields, a tag byte
    // per section, so "ab"+"c" never collides with "a"+"bc".
    hasher.update(recipe.name().as_bytes());
    hasher.update([0]);
    hasher.update(recipe.version().to_string().as_bytes());
    hasher.update([0]);

    for (name, value) in options {
        hasher.update([b'o']);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }

    for (key, value) in settings.fingerprint_entries(recipe.excluded_settings()) {
        hasher.update([b's']);
        hasher.update(key.name().as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }

    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(DIGEST_LEN);

    PackageIdentity {
        name: recipe.name().to_string(),
        version: recipe.version().clone(),
        digest,
    }
}

//! Query command - inspect committed artifact metadata

use super::store_root;
use anyhow::{anyhow, Result};
use kiln_build::store::ArtifactStore;
use kiln_package::identity::{PackageIdentity, DIGEST_LEN};
use semver::Version;
use std::path::PathBuf;

pub struct QueryArgs {
    pub reference: String,
    pub store: Option<PathBuf>,
    pub json: bool,
}

pub fn run(args: QueryArgs) -> Result<()> {
    let identity = parse_reference(&args.reference)?;
    let store = ArtifactStore::open(store_root(args.store)?)?;
    let artifact = store.query(&identity)?;

    if args.json {
        println!("{:#}", serde_json::to_value(&artifact)?);
        return Ok(());
    }

    println!("{identity}");
    let section = |label: &str, values: &[String]| {
        if !values.is_empty() {
            println!("  {label}: {}", values.join(" "));
        }
    };
    section("include dirs", &artifact.include_dirs);
    section("lib dirs", &artifact.lib_dirs);
    section("bin dirs", &artifact.bin_dirs);
    section("resource dirs", &artifact.res_dirs);
    section("libs", &artifact.libs);
    section("defines", &artifact.defines);
    section("cflags", &artifact.cflags);
    section("shared link flags", &artifact.sharedlinkflags);
    section("exe link flags", &artifact.exelinkflags);
    section("pkg-config dirs", &artifact.pkg_config_dirs);
    Ok(())
}

/// Parse a full `NAME/VERSION#DIGEST` reference
fn parse_reference(reference: &str) -> Result<PackageIdentity> {
    let malformed = || anyhow!("malformed reference '{reference}', expected NAME/VERSION#DIGEST");

    let (name_version, digest) = reference.split_once('#').ok_or_else(malformed)?;
    let (name, version) = name_version.split_once('/').ok_or_else(malformed)?;
    if name.is_empty() {
        return Err(malformed());
    }
    // The digest becomes a store path component; only the fixed-length
    // hex form an identity can actually produce is accepted.
    if digest.len() != DIGEST_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    let version = Version::parse(version).map_err(|_| malformed())?;

    Ok(PackageIdentity {
        name: name.to_string(),
        version,
        digest: digest.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_reference() {
        let identity = parse_reference("zlib/1.2.11#0123456789abcdef").unwrap();
        assert_eq!(identity.name, "zlib");
        assert_eq!(identity.version, Version::new(1, 2, 11));
        assert_eq!(identity.digest, "0123456789abcdef");
    }

    #[test]
    fn test_parse_rejects_missing_digest() {
        assert!(parse_reference("zlib/1.2.11").is_err());
        assert!(parse_reference("zlib#0123456789abcdef").is_err());
        assert!(parse_reference("/1.2.11#0123456789abcdef").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex_digest() {
        // Anything but fixed-length hex would become a store path component.
        assert!(parse_reference("zlib/1.2.11#abc").is_err());
        assert!(parse_reference("zlib/1.2.11#../../../etc/passwd").is_err());
        assert!(parse_reference("zlib/1.2.11#0123456789abcdeg").is_err());
    }
}

//! Artifact store: persisted build outputs keyed by package identity
//!
//! Layout is `<root>/<name>/<version>/<digest>/` with the installed tree
//! plus a `metadata.json` describing how to consume it. A package becomes
//! visible to queriers only through a whole-directory rename from the
//! staging area, so no partial artifact is ever observable.

use crate::metadata::{self, Artifact};
use kiln_package::identity::PackageIdentity;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use thiserror::Error;
use walkdir::WalkDir;

const METADATA_FILE: &str = "metadata.json";
const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no artifact committed for {0}")]
    ArtifactNotFound(PackageIdentity),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("corrupt artifact metadata for {identity}: {error}")]
    CorruptMetadata {
        identity: PackageIdentity,
        #[source]
        error: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of claiming the right to build one identity
pub enum Claim<'s> {
    /// Someone already committed this identity; reuse the artifact.
    Committed(Artifact),
    /// The caller is now the only builder of this identity.
    Claimed(ClaimGuard<'s>),
}

/// Exclusive in-flight claim on one identity. Dropping the guard (with or
/// without a commit) wakes blocked claimants.
pub struct ClaimGuard<'s> {
    store: &'s ArtifactStore,
    identity: PackageIdentity,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .store
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.identity);
        self.store.claim_released.notify_all();
    }
}

/// On-disk artifact store with a per-identity in-flight lock. The commit
/// path is the only shared-mutable boundary of the whole coordinator.
pub struct ArtifactStore {
    root: PathBuf,
    in_flight: Mutex<HashSet<PackageIdentity>>,
    claim_released: Condvar,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            in_flight: Mutex::new(HashSet::new()),
            claim_released: Condvar::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, identity: &PackageIdentity) -> PathBuf {
        self.root
            .join(&identity.name)
            .join(identity.version.to_string())
            .join(&identity.digest)
    }

    /// The placeholder-rooted form of the package directory, as persisted
    /// metadata refers to it.
    fn relocated_package_dir(&self, identity: &PackageIdentity) -> String {
        format!(
            "{}/{}/{}/{}",
            metadata::STORAGE_ROOT_TOKEN,
            identity.name,
            identity.version,
            identity.digest
        )
    }

    /// Whether a committed artifact exists for `identity`
    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.package_dir(identity).join(METADATA_FILE).is_file()
    }

    /// Read-only view of a committed artifact
    pub fn query(&self, identity: &PackageIdentity) -> StoreResult<Artifact> {
        let path = self.package_dir(identity).join(METADATA_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ArtifactNotFound(identity.clone()));
            }
            Err(error) => return Err(StoreError::io(path, error)),
        };

        serde_json::from_str(&content).map_err(|error| StoreError::CorruptMetadata {
            identity: identity.clone(),
            error,
        })
    }

    /// Claim the right to build `identity`. At most one claim exists per
    /// identity at a time; concurrent claimants block until the holder
    /// commits (then receive the artifact) or releases without committing
    /// (then claim it themselves).
    pub fn claim(&self, identity: &PackageIdentity) -> StoreResult<Claim<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        loop {
            if self.contains(identity) {
                return Ok(Claim::Committed(self.query(identity)?));
            }
            if !in_flight.contains(identity) {
                in_flight.insert(identity.clone());
                return Ok(Claim::Claimed(ClaimGuard {
                    store: self,
                    identity: identity.clone(),
                }));
            }
            in_flight = self
                .claim_released
                .wait(in_flight)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// A fresh staging directory for `identity`, on the same filesystem as
    /// the store so the final commit is a single rename. Recipes receive it
    /// as their install target.
    pub fn staging_dir(&self, identity: &PackageIdentity) -> StoreResult<PathBuf> {
        let dir = self.root.join(STAGING_DIR).join(format!(
            "{}-{}-{}",
            identity.name, identity.version, identity.digest
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Commit a raw build output tree as the artifact for `identity`.
    ///
    /// Rewrites pkg-config files so no machine-local absolute path
    /// survives, removes libtool droppings, extracts consumption metadata,
    /// then renames the whole tree into its final location. Queriers see
    /// either nothing or the complete artifact.
    pub fn commit(&self, identity: &PackageIdentity, output_dir: &Path) -> StoreResult<Artifact> {
        if self.contains(identity) {
            return self.query(identity);
        }

        let mut artifact = Artifact::new();

        for pc_file in find_files(output_dir, "pc") {
            let content = fs::read_to_string(&pc_file).map_err(|e| StoreError::io(&pc_file, e))?;

            // The install prefix baked in at configure time is the staging
            // path; point it at the final placeholder-rooted location, then
            // strip any other reference to the local storage root.
            let retargeted =
                content.replace(&output_dir.display().to_string(), &self.relocated_package_dir(identity));
            let rewritten = metadata::rewrite_pc_file(&retargeted, &self.root);

            fs::write(&pc_file, &rewritten).map_err(|e| StoreError::io(&pc_file, e))?;
            artifact.merge_pc_source(&rewritten);

            if let Some(parent) = pc_file.parent() {
                let relocated = relocate_under(parent, output_dir, &self.relocated_package_dir(identity));
                push_unique(&mut artifact.pkg_config_dirs, relocated);
            }
        }

        // libtool metadata duplicates what the artifact already records.
        for la_file in find_files(output_dir, "la") {
            fs::remove_file(&la_file).map_err(|e| StoreError::io(&la_file, e))?;
        }

        self.scan_structure(identity, output_dir, &mut artifact);

        let metadata_path = output_dir.join(METADATA_FILE);
        let rendered = serde_json::to_string_pretty(&artifact).map_err(|error| {
            StoreError::CorruptMetadata {
                identity: identity.clone(),
                error,
            }
        })?;
        fs::write(&metadata_path, rendered).map_err(|e| StoreError::io(&metadata_path, e))?;

        let package_dir = self.package_dir(identity);
        if let Some(parent) = package_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::rename(output_dir, &package_dir).map_err(|e| StoreError::io(&package_dir, e))?;

        Ok(artifact)
    }

    /// Record the conventional install-tree directories that exist.
    fn scan_structure(&self, identity: &PackageIdentity, output_dir: &Path, artifact: &mut Artifact) {
        let relocated_root = self.relocated_package_dir(identity);
        let record = |subdir: &str, list: &mut Vec<String>| {
            if output_dir.join(subdir).is_dir() {
                push_unique(list, format!("{}/{}", relocated_root, subdir));
            }
        };

        record("include", &mut artifact.include_dirs);
        record("lib", &mut artifact.lib_dirs);
        record("bin", &mut artifact.bin_dirs);
        record("share", &mut artifact.res_dirs);
    }
}

fn find_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some(extension)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn relocate_under(path: &Path, output_dir: &Path, relocated_root: &str) -> String {
    path.display()
        .to_string()
        .replace(&output_dir.display().to_string(), relocated_root)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn identity(name: &str) -> PackageIdentity {
        PackageIdentity {
            name: name.to_string(),
            version: Version::new(1, 2, 11),
            digest: "0123456789abcdef".to_string(),
        }
    }

    fn store() -> (TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("store")).unwrap();
        (dir, store)
    }

    /// Lay out a fake install tree with a pkg-config file under the
    /// staging dir, the way a real `make install` would.
    fn populate(staging: &Path) {
        fs::create_dir_all(staging.join("include")).unwrap();
        fs::create_dir_all(staging.join("lib/pkgconfig")).unwrap();
        fs::write(staging.join("include/zlib.h"), "// zlib").unwrap();
        fs::write(staging.join("lib/libz.so.1.2.11"), "elf").unwrap();
        fs::write(staging.join("lib/libz.la"), "# libtool").unwrap();
        fs::write(
            staging.join("lib/pkgconfig/zlib.pc"),
            format!(
                "prefix={0}\nlibdir={0}/lib\nName: zlib\nLibs: -L{0}/lib -lz -Wl,-rpath,/x\nCflags: -I{0}/include -DZLIB_CONST\n",
                staging.display()
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_query_uncommitted_fails() {
        let (_tmp, store) = store();
        let err = store.query(&identity("zlib")).unwrap_err();
        assert!(matches!(err, StoreError::ArtifactNotFound(_)));
        assert!(!store.contains(&identity("zlib")));
    }

    #[test]
    fn test_commit_then_query_round_trips() {
        let (_tmp, store) = store();
        let id = identity("zlib");
        let staging = store.staging_dir(&id).unwrap();
        populate(&staging);

        let committed = store.commit(&id, &staging).unwrap();
        let queried = store.query(&id).unwrap();
        assert_eq!(committed, queried);

        assert_eq!(queried.libs, vec!["z"]);
        assert_eq!(queried.defines, vec!["ZLIB_CONST"]);
        assert_eq!(queried.sharedlinkflags, vec!["-Wl,-rpath,/x"]);
        assert_eq!(queried.exelinkflags, vec!["-Wl,-rpath,/x"]);
        assert_eq!(
            queried.pkg_config_dirs,
            vec!["${kiln_storage_root}/zlib/1.2.11/0123456789abcdef/lib/pkgconfig"]
        );
        assert_eq!(
            queried.include_dirs,
            vec!["${kiln_storage_root}/zlib/1.2.11/0123456789abcdef/include"]
        );
    }

    #[test]
    fn test_commit_relocates_pc_file() {
        let (_tmp, store) = store();
        let id = identity("zlib");
        let staging = store.staging_dir(&id).unwrap();
        populate(&staging);
        store.commit(&id, &staging).unwrap();

        let pc_path = store
            .root()
            .join("zlib/1.2.11/0123456789abcdef/lib/pkgconfig/zlib.pc");
        let content = fs::read_to_string(pc_path).unwrap();

        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), metadata::STORAGE_ROOT_DECLARATION);
        assert!(!content.contains(&store.root().display().to_string()));
        assert!(content
            .contains("prefix=${kiln_storage_root}/zlib/1.2.11/0123456789abcdef"));

        // Substituting a root string back reproduces absolute paths.
        let resolved = metadata::resolve_placeholder(&content, Path::new("/mnt/cache"));
        assert!(resolved.contains("libdir=/mnt/cache/zlib/1.2.11/0123456789abcdef/lib"));
    }

    #[test]
    fn test_commit_removes_libtool_files() {
        let (_tmp, store) = store();
        let id = identity("zlib");
        let staging = store.staging_dir(&id).unwrap();
        populate(&staging);
        store.commit(&id, &staging).unwrap();

        let la = store
            .root()
            .join("zlib/1.2.11/0123456789abcdef/lib/libz.la");
        assert!(!la.exists());
    }

    #[test]
    fn test_commit_is_idempotent() {
        let (_tmp, store) = store();
        let id = identity("zlib");
        let staging = store.staging_dir(&id).unwrap();
        populate(&staging);
        let first = store.commit(&id, &staging).unwrap();

        // A second commit for the same identity reuses the stored artifact.
        let staging_again = store.staging_dir(&id).unwrap();
        populate(&staging_again);
        let second = store.commit(&id, &staging_again).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_claim_committed_identity_returns_artifact() {
        let (_tmp, store) = store();
        let id = identity("zlib");
        let staging = store.staging_dir(&id).unwrap();
        populate(&staging);
        store.commit(&id, &staging).unwrap();

        match store.claim(&id).unwrap() {
            Claim::Committed(artifact) => assert_eq!(artifact.libs, vec!["z"]),
            Claim::Claimed(_) => panic!("expected committed claim"),
        };
    }

    #[test]
    fn test_claim_blocks_second_claimant_until_release() {
        let (_tmp, store) = store();
        let id = identity("zlib");

        let guard = match store.claim(&id).unwrap() {
            Claim::Claimed(guard) => guard,
            Claim::Committed(_) => panic!("store is empty"),
        };

        thread::scope(|scope| {
            let waiter = scope.spawn(|| match store.claim(&id).unwrap() {
                Claim::Claimed(_) => "claimed",
                Claim::Committed(_) => "committed",
            });

            // Give the waiter time to block on the in-flight claim.
            thread::sleep(Duration::from_millis(50));
            assert!(!waiter.is_finished());

            drop(guard);
            assert_eq!(waiter.join().unwrap(), "claimed");
        });
    }
}

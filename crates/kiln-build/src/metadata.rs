//! Exported package metadata and path relocation
//!
//! Consumption metadata is parsed out of pkg-config-style files found in a
//! package's install tree. Absolute paths under the storage root are
//! rewritten to the `${kiln_storage_root}` placeholder before anything is
//! persisted, so a committed package is portable to a machine with a
//! different storage root.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Variable name used in rewritten pkg-config files
pub const STORAGE_ROOT_VAR: &str = "kiln_storage_root";

/// Placeholder token standing in for the local storage root
pub const STORAGE_ROOT_TOKEN: &str = "${kiln_storage_root}";

/// Declaration line prepended to rewritten pkg-config files; a consuming
/// machine substitutes its own storage root for the default.
pub const STORAGE_ROOT_DECLARATION: &str = "kiln_storage_root=~/.kiln/store";

/// Consumption metadata of one committed package. All contained paths are
/// placeholder-rooted; consumers substitute their storage root back in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Ordered include paths, relative to the package root
    pub include_dirs: Vec<String>,
    /// Directories where libraries can be found
    pub lib_dirs: Vec<String>,
    /// Directories where executables and shared libs can be found
    pub bin_dirs: Vec<String>,
    /// Directories where resources and data can be found
    pub res_dirs: Vec<String>,
    /// Libraries to link against, without the `-l` prefix
    pub libs: Vec<String>,
    /// Preprocessor definitions, without the `-D` prefix
    pub defines: Vec<String>,
    /// Compilation flags for C sources
    pub cflags: Vec<String>,
    /// Compilation flags for C++ sources; opaque `Cflags:` tokens land in
    /// both lists since pkg-config does not distinguish the languages
    #[serde(default)]
    pub cppflags: Vec<String>,
    /// Linker flags for shared-library links
    pub sharedlinkflags: Vec<String>,
    /// Linker flags for executable links
    pub exelinkflags: Vec<String>,
    /// pkg-config directories, exported to consumers as a search path
    pub pkg_config_dirs: Vec<String>,
}

impl Artifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the token list of one `Libs:` line. `-L` search paths are
    /// recognized and dropped (the lib dirs are exported structurally),
    /// `-l` names are stripped of their prefix, anything else is an opaque
    /// linker flag preserved verbatim for both shared and executable links.
    /// Every list dedups on first occurrence, preserving order.
    pub fn merge_libs_line(&mut self, line: &str) {
        for token in line.split_whitespace() {
            if token.starts_with("-L") {
                // Search path; superseded by the structural lib dirs.
            } else if let Some(lib) = token.strip_prefix("-l") {
                push_unique(&mut self.libs, lib);
            } else if let Some(define) = token.strip_prefix("-D") {
                push_unique(&mut self.defines, define);
            } else {
                push_unique(&mut self.sharedlinkflags, token);
                push_unique(&mut self.exelinkflags, token);
            }
        }
    }

    /// Merge the token list of one `Cflags:` line. `-I` include paths are
    /// recognized and dropped, `-D` defines are stripped of their prefix,
    /// anything else is an opaque compile flag.
    pub fn merge_cflags_line(&mut self, line: &str) {
        for token in line.split_whitespace() {
            if token.starts_with("-I") {
                // Include path; superseded by the structural include dirs.
            } else if let Some(define) = token.strip_prefix("-D") {
                push_unique(&mut self.defines, define);
            } else {
                push_unique(&mut self.cflags, token);
                push_unique(&mut self.cppflags, token);
            }
        }
    }

    /// Merge every recognized section of one pkg-config file.
    pub fn merge_pc_source(&mut self, text: &str) {
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("Libs:") {
                self.merge_libs_line(rest);
            } else if let Some(rest) = line.strip_prefix("Cflags:") {
                self.merge_cflags_line(rest);
            }
        }
    }
}

fn push_unique(list: &mut Vec<String>, token: &str) {
    if !list.iter().any(|existing| existing == token) {
        list.push(token.to_string());
    }
}

/// Replace every occurrence of the absolute storage root with the
/// placeholder token.
pub fn relocate(text: &str, storage_root: &Path) -> String {
    text.replace(&storage_root.display().to_string(), STORAGE_ROOT_TOKEN)
}

/// Substitute a concrete storage root for the placeholder token; the exact
/// inverse of [`relocate`] for any root string.
pub fn resolve_placeholder(text: &str, storage_root: &Path) -> String {
    text.replace(STORAGE_ROOT_TOKEN, &storage_root.display().to_string())
}

/// Rewrite one pkg-config file body for persistence: relocate the storage
/// root and prepend the root declaration line.
pub fn rewrite_pc_file(text: &str, storage_root: &Path) -> String {
    let mut rewritten = String::with_capacity(text.len() + STORAGE_ROOT_DECLARATION.len() + 1);
    rewritten.push_str(STORAGE_ROOT_DECLARATION);
    rewritten.push('\n');
    rewritten.push_str(&relocate(text, storage_root));
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_merge_libs_line_classifies_tokens() {
        let mut artifact = Artifact::new();
        artifact.merge_libs_line(" -L/home/u/.store/data/lib -lz -Wl,-rpath,/x");

        assert_eq!(artifact.libs, vec!["z"]);
        assert_eq!(artifact.sharedlinkflags, vec!["-Wl,-rpath,/x"]);
        assert_eq!(artifact.exelinkflags, vec!["-Wl,-rpath,/x"]);
        assert!(artifact.lib_dirs.is_empty());
    }

    #[test]
    fn test_merge_libs_line_dedups_first_seen() {
        let mut artifact = Artifact::new();
        artifact.merge_libs_line("-lz -lm");
        artifact.merge_libs_line("-lz -lpthread");

        assert_eq!(artifact.libs, vec!["z", "m", "pthread"]);
    }

    #[test]
    fn test_merge_cflags_line() {
        let mut artifact = Artifact::new();
        artifact.merge_cflags_line("-I/store/include -DZLIB_CONST -pthread");
        artifact.merge_cflags_line("-DZLIB_CONST");

        assert!(artifact.include_dirs.is_empty());
        assert_eq!(artifact.defines, vec!["ZLIB_CONST"]);
        assert_eq!(artifact.cflags, vec!["-pthread"]);
        assert_eq!(artifact.cppflags, vec!["-pthread"]);
    }

    #[test]
    fn test_merge_pc_source_sections() {
        let mut artifact = Artifact::new();
        artifact.merge_pc_source(
            "prefix=${kiln_storage_root}/zlib\nName: zlib\nLibs: -L${libdir} -lz\nCflags: -I${includedir} -DZLIB_CONST\n",
        );

        assert_eq!(artifact.libs, vec!["z"]);
        assert_eq!(artifact.defines, vec!["ZLIB_CONST"]);
    }

    #[test]
    fn test_relocate_round_trip() {
        let root = PathBuf::from("/home/u/.store/data");
        let original = "libdir=/home/u/.store/data/zlib/1.2.11/lib\n";

        let relocated = relocate(original, &root);
        assert_eq!(relocated, "libdir=${kiln_storage_root}/zlib/1.2.11/lib\n");

        // Re-substituting any root reproduces an absolute path.
        assert_eq!(resolve_placeholder(&relocated, &root), original);
        let other = resolve_placeholder(&relocated, Path::new("/mnt/cache"));
        assert_eq!(other, "libdir=/mnt/cache/zlib/1.2.11/lib\n");
    }

    #[test]
    fn test_rewrite_pc_file_prepends_declaration() {
        let root = PathBuf::from("/home/u/.store/data");
        let rewritten = rewrite_pc_file("libdir=/home/u/.store/data/lib\nLibs: -lz\n", &root);

        let mut lines = rewritten.lines();
        assert_eq!(lines.next().unwrap(), STORAGE_ROOT_DECLARATION);
        assert_eq!(lines.next().unwrap(), "libdir=${kiln_storage_root}/lib");
    }
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{BTreeMap, BTreeSet};

/// A single candidate filesystem extracted from firmware.
///
/// Built once by the loader and immutable afterwards; the unifier only ever
/// borrows it.
#[derive(Debug, Clone, Default)]
pub struct FilesystemInfo {
    /// Unique identifier, e.g. the candidate archive's file name.
    pub name: String,
    /// Normalized archive-relative paths. Every entry begins with `./` and
    /// never ends with `/`. Directories, files and symlinks are all members.
    pub paths: BTreeSet<String>,
    /// Mapping from a member path to its symlink target, exactly as stored
    /// in the archive (may be relative or absolute, unresolved).
    pub links: BTreeMap<String, String>,
    /// Paths referenced from file contents (ELF dynamic entries, or strings
    /// found by the regex scan). Always begin with `/`.
    pub references: BTreeSet<String>,
    /// Sum of member sizes, including zero-sized directory entries.
    pub size: u64,
}

impl FilesystemInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Records a plain path member (file, directory, or the path-half of a
    /// symlink/hardlink).
    pub fn insert_path(&mut self, path: String) {
        debug_assert!(
            path == "./" || (path.starts_with("./") && !path.ends_with('/')),
            "path {path:?} must start with './' and not end with '/'"
        );
        self.paths.insert(path);
    }

    /// Records a symlink or hardlink member: both its path and its target.
    pub fn insert_link(&mut self, path: String, target: String) {
        self.insert_path(path.clone());
        self.links.insert(path, target);
    }

    /// Records an externally-referenced path, silently dropping it if it
    /// fails the basic reference invariants. Extraction-specific
    /// filtering (regex validity, IP-address rejection, etc.) happens
    /// before this is called; this is the last line of defense against
    /// malformed input corrupting the model.
    pub fn insert_reference(&mut self, reference: String) {
        if is_well_formed_reference(&reference) {
            self.references.insert(reference);
        } else {
            tracing::debug!(%reference, "dropping malformed reference");
        }
    }
}

/// The invariants every reference must satisfy, regardless of how it was
/// discovered: length strictly between 3 and 255, no whitespace or NUL,
/// not purely numeric, and not a C source path.
pub fn is_well_formed_reference(candidate: &str) -> bool {
    let len = candidate.len();
    if !(len > 3 && len < 255) {
        return false;
    }
    if candidate.chars().any(|c| c.is_whitespace() || c == '\0') {
        return false;
    }
    if candidate.ends_with(".c") {
        return false;
    }
    let digits_only: String = candidate.chars().filter(|&c| c != '/').collect();
    if !digits_only.is_empty() && digits_only.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    true
}

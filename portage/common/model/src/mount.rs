// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{BTreeMap, BTreeSet};

use crate::repository::FilesystemRepository;

/// An ordered mapping from mount point (e.g. `"./"`, `"./mnt/"`) to the name
/// of the filesystem grafted there. This is the unifier's search state.
pub type MountMap = BTreeMap<String, String>;

/// The root mount point.
pub const ROOT_MOUNT: &str = "./";

/// Joins a mount point (ending in `/`) with a path from that filesystem
/// (beginning with `./`), producing an absolute-style (but still `./`
/// prefixed) path in the unified tree. `./` + `./bin/sh` -> `./bin/sh`;
/// `./mnt/` + `./data/config.cfg` -> `./mnt/data/config.cfg`.
pub fn join_mount(mount_point: &str, path: &str) -> String {
    let rel = path.strip_prefix("./").unwrap_or(path);
    if rel.is_empty() {
        mount_point.to_string()
    } else {
        format!("{mount_point}{rel}")
    }
}

/// For every mount point (processed from longest to shortest, so that a
/// deeper mount shadows an ancestor's contribution), the set of unified-tree
/// paths it actually contributes once shadowing is resolved.
///
/// This is the core of both [`visible_paths`] and [`RealizedView`]: a path
/// contributed by a mount point is visible only if no already-claimed
/// (i.e. longer, or tied and earlier by name) mount point owns a prefix of
/// it.
fn compute_ownership(
    mounts: &MountMap,
    repo: &FilesystemRepository,
) -> BTreeMap<String, (String, String)> {
    let mut order: Vec<&String> = mounts.keys().collect();
    order.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut claimed: Vec<&str> = Vec::new();
    let mut owned: BTreeMap<String, (String, String)> = BTreeMap::new();

    for mount_point in order {
        let Some(fs_name) = mounts.get(mount_point) else {
            continue;
        };
        let Some(fs) = repo.get(fs_name) else {
            continue;
        };
        for path in &fs.paths {
            let abs = join_mount(mount_point, path);
            if claimed.iter().any(|prefix| abs.starts_with(prefix)) {
                continue;
            }
            owned.insert(abs, (mount_point.clone(), path.clone()));
        }
        claimed.push(mount_point.as_str());
    }

    owned
}

/// The set of unified-tree paths each mount point contributes, after
/// shadowing. `visible_paths(mounts, repo)` forms a partition of the unified
/// path set: no path appears under two mount points.
pub fn visible_paths(
    mounts: &MountMap,
    repo: &FilesystemRepository,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut result: BTreeMap<String, BTreeSet<String>> =
        mounts.keys().map(|mp| (mp.clone(), BTreeSet::new())).collect();
    for (abs, (mount_point, _)) in compute_ownership(mounts, repo) {
        result.entry(mount_point).or_default().insert(abs);
    }
    result
}

/// The references that remain unresolved given the currently realized tree:
/// the union of every mounted filesystem's references, minus those already
/// present (as `.` + reference) among the visible paths.
pub fn unresolved_references(mounts: &MountMap, repo: &FilesystemRepository) -> BTreeSet<String> {
    let owned = compute_ownership(mounts, repo);

    let mut refs: BTreeSet<String> = BTreeSet::new();
    for fs_name in mounts.values() {
        if let Some(fs) = repo.get(fs_name) {
            refs.extend(fs.references.iter().cloned());
        }
    }

    refs.into_iter()
        .filter(|r| !owned.contains_key(&format!(".{r}")))
        .collect()
}

/// A derived view of the merged tree: for every absolute-style path that is
/// actually reachable, which `(mount_point, original_path)` provides it.
/// Ephemeral — recomputed on demand from a [`MountMap`].
pub struct RealizedView {
    entries: BTreeMap<String, (String, String)>,
}

impl RealizedView {
    pub fn compute(mounts: &MountMap, repo: &FilesystemRepository) -> Self {
        Self {
            entries: compute_ownership(mounts, repo),
        }
    }

    /// Whether the given `/`-absolute reference is satisfied by the
    /// realized tree.
    pub fn contains_reference(&self, reference: &str) -> bool {
        self.entries.contains_key(&format!(".{reference}"))
    }

    pub fn get(&self, abs_path: &str) -> Option<&(String, String)> {
        self.entries.get(abs_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &(String, String))> {
        self.entries.iter()
    }
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

use model::{join_mount, FilesystemRepository, MountMap};

/// Maps every symlink's absolute-style path in the currently mounted tree
/// to the absolute-style path it resolves to (one hop; chains are followed
/// by repeated lookups).
pub type SymlinkMap = BTreeMap<String, String>;

/// Builds the symlink map for the current search state: every link in
/// every mounted filesystem, keyed by its location in the unified tree.
pub fn build_symlink_map(mounts: &MountMap, repo: &FilesystemRepository) -> SymlinkMap {
    let mut map = SymlinkMap::new();
    for (mount_point, fs_name) in mounts {
        let Some(fs) = repo.get(fs_name) else {
            continue;
        };
        for (link_path, target) in &fs.links {
            let abs_link = join_mount(mount_point, link_path);
            let dest = resolve_relative_to(&abs_link, target);
            map.insert(abs_link, dest);
        }
    }
    map
}

/// Resolves `target` (as stored in the symlink, relative or absolute)
/// against the directory containing `abs_link`, normalizing `.`/`..`
/// components to produce a `./`-prefixed path.
fn resolve_relative_to(abs_link: &str, target: &str) -> String {
    let dir = Path::new(abs_link).parent().unwrap_or_else(|| Path::new("."));
    normalize(&dir.join(target))
}

fn normalize(path: &Path) -> String {
    let mut stack: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => stack.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                stack.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if stack.is_empty() {
        "./".to_string()
    } else {
        format!("./{}", stack.join("/"))
    }
}

/// Follows `symlink_map` from `mount_point` until a fixed point or a cycle
/// is reached, bounded by the map's size so a symlink cycle resolves to "no
/// rewrite" rather than looping forever.
pub fn rewrite_mount_point(mount_point: &str, symlink_map: &SymlinkMap) -> String {
    let mut current = mount_point.trim_end_matches('/').to_string();
    if current.is_empty() {
        current = ".".to_string();
    }

    let mut seen = BTreeSet::new();
    for _ in 0..=symlink_map.len() {
        if !seen.insert(current.clone()) {
            return mount_point.to_string();
        }
        let Some(next) = symlink_map.get(&current) else {
            break;
        };
        let next = next.trim_end_matches('/').to_string();
        if next == current {
            break;
        }
        current = next;
    }

    format!("{}/", current.trim_end_matches('/'))
}

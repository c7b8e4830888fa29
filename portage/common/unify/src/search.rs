// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;

use itertools::Itertools;
use model::{
    unresolved_references, visible_paths, FilesystemInfo, FilesystemRepository, MountMap,
    ROOT_MOUNT,
};
use rayon::prelude::*;

use crate::symlinks::{build_symlink_map, rewrite_mount_point, SymlinkMap};

/// Markers checked by [`could_be_root`]: directories and files a real Linux
/// root filesystem is expected to carry. At least `COULD_BE_ROOT_THRESHOLD`
/// of these must be present for a filesystem to seed the search.
const COULD_BE_ROOT_MARKERS: [&str; 22] = [
    "./var",
    "./usr",
    "./run",
    "./bin",
    "./sbin",
    "./sys",
    "./tmp",
    "./etc",
    "./home",
    "./lib",
    "./media",
    "./mnt",
    "./opt",
    "./proc",
    "./dev",
    "./root",
    "./srv",
    "./etc/passwd",
    "./etc/fstab",
    "./bin/ls",
    "./bin/bash",
    "./bin/busybox",
];
const COULD_BE_ROOT_THRESHOLD: usize = 3;

/// Mount points that are never valid regardless of what they would
/// resolve, matching `unifyroot`'s `INVALID_ROOTS` rather than the looser
/// set some variants use.
const INVALID_MOUNTS: [&str; 4] = ["./proc", "./sys", "./dev", "./tmp"];
const MAX_MOUNT_POINT_LEN: usize = 30;

pub fn could_be_root(fs: &FilesystemInfo) -> bool {
    COULD_BE_ROOT_MARKERS
        .iter()
        .filter(|marker| fs.paths.contains(**marker))
        .count()
        >= COULD_BE_ROOT_THRESHOLD
}

/// Finds the best `MountMap` over every filesystem that could seed a root,
/// returning `None` if none does.
///
/// Runs the per-root searches sequentially, in sorted root-name order, so
/// logs interleave predictably. Each root's search only reads the shared,
/// immutable repository, so the searches are independent; see
/// [`unify_parallel`] for a rayon-backed variant that exploits that.
pub fn unify(repo: &FilesystemRepository) -> Option<MountMap> {
    let scored: Vec<_> = candidate_roots(repo)
        .into_iter()
        .map(|name| score_root(name, repo))
        .collect();
    pick_best(scored)
}

/// Same result as [`unify`], but evaluates candidate roots concurrently via
/// rayon. Useful when a repository has many plausible roots and wall-clock
/// time matters more than deterministic log interleaving; both functions
/// pick the winner by `(score desc, root name asc)`, so the returned
/// `MountMap` is identical regardless of which one is called.
pub fn unify_parallel(repo: &FilesystemRepository) -> Option<MountMap> {
    let scored: Vec<_> = candidate_roots(repo)
        .into_par_iter()
        .map(|name| score_root(name, repo))
        .collect();
    pick_best(scored)
}

fn candidate_roots(repo: &FilesystemRepository) -> Vec<&str> {
    repo.names()
        .filter(|name| repo.get(name).map_or(false, could_be_root))
        .collect()
}

fn score_root<'a>(name: &'a str, repo: &FilesystemRepository) -> (&'a str, MountMap, i64) {
    let mut mounts = MountMap::new();
    mounts.insert(ROOT_MOUNT.to_string(), name.to_string());
    let (result, score) = try_unify_from(&mounts, repo);
    (name, result, score)
}

fn pick_best(scored: Vec<(&str, MountMap, i64)>) -> Option<MountMap> {
    scored
        .into_iter()
        .sorted_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)))
        .next()
        .map(|(_, mounts, _)| mounts)
}

/// The recursive greedy search: given a partial `mounts`, tries adding each
/// remaining filesystem at its best-scoring mount point and keeps the
/// subtree that improves `configuration_score` the most.
pub fn try_unify_from(mounts: &MountMap, repo: &FilesystemRepository) -> (MountMap, i64) {
    let unresolved = unresolved_references(mounts, repo);
    let base_score = configuration_score(mounts, repo);
    let symlink_map = build_symlink_map(mounts, repo);

    let mut best_mounts = mounts.clone();
    let mut best_score = base_score;
    let mut best_improvement = -1i64;

    let remaining: Vec<&str> = repo
        .names()
        .filter(|name| !mounts.values().any(|mounted| mounted == name))
        .collect();

    for fs_name in remaining {
        let Some(fs) = repo.get(fs_name) else {
            continue;
        };
        let Some((mount_point, improvement)) =
            find_best_mount_point(mounts, fs, &unresolved, &symlink_map, repo)
        else {
            continue;
        };
        if improvement <= 0 {
            continue;
        }

        let mut candidate_mounts = mounts.clone();
        candidate_mounts.insert(mount_point, fs_name.to_string());
        let (candidate_result, candidate_score) = try_unify_from(&candidate_mounts, repo);

        // Ties are broken by the number of resolutions this placement
        // produced and, failing that, by `fs_name` (iterated in sorted
        // order above), keeping the search deterministic.
        let replace = candidate_score > best_score
            || (candidate_score == best_score && improvement > best_improvement);
        if replace {
            best_score = candidate_score;
            best_improvement = improvement;
            best_mounts = candidate_result;
        }
    }

    (best_mounts, best_score)
}

/// Sum of mounted filesystems' path counts: a larger unified tree scores
/// higher.
pub fn configuration_score(mounts: &MountMap, repo: &FilesystemRepository) -> i64 {
    mounts
        .values()
        .filter_map(|name| repo.get(name))
        .map(|fs| fs.paths.len() as i64)
        .sum()
}

fn find_best_mount_point(
    mounts: &MountMap,
    fs: &FilesystemInfo,
    unresolved: &BTreeSet<String>,
    symlink_map: &SymlinkMap,
    repo: &FilesystemRepository,
) -> Option<(String, i64)> {
    let visible = visible_paths(mounts, repo);
    let all_visible: BTreeSet<String> = visible.into_values().flatten().collect();

    let mut candidate_points: BTreeSet<String> = BTreeSet::new();
    for u in unresolved {
        for p in &fs.paths {
            if let Some(mp) = compute_potential_mount_point(u, p) {
                candidate_points.insert(mp);
            }
        }
    }

    // Among candidate mount points, prefer the one resolving the most
    // references, breaking ties by the shorter (and then lexicographically
    // earlier) mount point, so the search is deterministic.
    candidate_points
        .into_iter()
        .map(|raw_mount_point| rewrite_mount_point(&raw_mount_point, symlink_map))
        .filter(|mount_point| is_valid_mount_point(mount_point, mounts))
        .map(|mount_point| {
            let resolved = resolved_count(&mount_point, fs, unresolved);
            let improvement = score_mount(&mount_point, fs, unresolved, &all_visible);
            (mount_point, resolved, improvement)
        })
        .sorted_by(|a, b| {
            b.2.cmp(&a.2)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.0.len().cmp(&b.0.len()))
                .then_with(|| a.0.cmp(&b.0))
        })
        .next()
        .map(|(mount_point, _, improvement)| (mount_point, improvement))
}

/// Count of unresolved references that `mount_point` would resolve if `fs`
/// were mounted there, independent of the improvement-scoring rules.
fn resolved_count(mount_point: &str, fs: &FilesystemInfo, unresolved: &BTreeSet<String>) -> usize {
    resolved_refs(mount_point, fs, unresolved).len()
}

/// The subset of `unresolved` that mounting `fs` at `mount_point` would
/// satisfy.
fn resolved_refs<'a>(
    mount_point: &str,
    fs: &FilesystemInfo,
    unresolved: &'a BTreeSet<String>,
) -> BTreeSet<&'a String> {
    unresolved
        .iter()
        .filter(|u| {
            let abs = format!(".{u}");
            if !abs.starts_with(mount_point) {
                return false;
            }
            let rel = &abs[mount_point.len()..];
            fs.paths.contains(&format!("./{rel}"))
        })
        .collect()
}

/// For an unresolved reference `u` ("/a/b/c") and a path `p` ("./b/c") in a
/// candidate filesystem, checks whether `p` (with its leading `.` stripped)
/// is a suffix of `u`; if so, the removed prefix ("/a") is a potential
/// mount point, normalized to `./a/`.
fn compute_potential_mount_point(u: &str, p: &str) -> Option<String> {
    let stripped = p.strip_prefix('.').unwrap_or(p);
    if stripped.is_empty() || !u.ends_with(stripped) {
        return None;
    }
    let prefix = &u[..u.len() - stripped.len()];
    Some(normalize_mount_point(prefix))
}

fn normalize_mount_point(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_MOUNT.to_string()
    } else {
        format!(".{trimmed}/")
    }
}

fn is_valid_mount_point(mount_point: &str, mounts: &MountMap) -> bool {
    let trimmed = mount_point.trim_end_matches('/');

    if INVALID_MOUNTS.iter().any(|invalid| {
        trimmed == *invalid || trimmed.starts_with(&format!("{invalid}/"))
    }) {
        return false;
    }
    if looks_unlikely(mount_point) {
        return false;
    }
    if mount_point.len() > MAX_MOUNT_POINT_LEN {
        return false;
    }
    // Equal to, or a parent of, an existing mount point.
    if mounts.keys().any(|existing| existing.starts_with(mount_point)) {
        return false;
    }
    true
}

fn looks_unlikely(mount_point: &str) -> bool {
    mount_point.contains("www.")
        || mount_point.ends_with(".com")
        || mount_point.ends_with(".com/")
        || mount_point.contains(".com/")
        || mount_point.contains("-none-")
        || mount_point.contains("-gcc-")
        || mount_point.contains("-clang-")
        || mount_point.contains("-gnu")
}

/// Score improvement for mounting `fs` at `mount_point`. Rules are checked
/// in order, first match wins, except for the long-names override applied
/// last.
fn score_mount(
    mount_point: &str,
    fs: &FilesystemInfo,
    unresolved: &BTreeSet<String>,
    all_visible: &BTreeSet<String>,
) -> i64 {
    let resolved = resolved_refs(mount_point, fs, unresolved);

    let lost_count = all_visible
        .iter()
        .filter(|v| v.starts_with(mount_point))
        .count();

    if lost_count > 5 {
        return 0;
    }
    if resolved.len() > 2 {
        return resolved.len() as i64;
    }
    if resolved.is_empty() {
        return -1;
    }

    let suffixes: String = resolved
        .iter()
        .map(|u| {
            let abs = format!(".{u}");
            abs[mount_point.len()..].to_string()
        })
        .collect();

    let mut improvement = if is_mostly_non_ascii_letters(&suffixes) {
        0
    } else if fs.paths.len() < 10 {
        resolved.len() as i64
    } else {
        0
    };

    // Mirrors the original scoring order: the long-names check runs after
    // the ASCII check and can override its 0 (see DESIGN.md).
    if suffixes.chars().count() > 10 {
        improvement = resolved.len() as i64;
    }

    improvement
}

fn is_mostly_non_ascii_letters(suffixes: &str) -> bool {
    let total = suffixes.chars().count();
    if total == 0 {
        return false;
    }
    let ascii_letters = suffixes.chars().filter(|c| c.is_ascii_alphabetic()).count();
    ascii_letters * 2 < total
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::FilesystemInfo;

    fn repo_with(fses: Vec<FilesystemInfo>) -> FilesystemRepository {
        let mut repo = FilesystemRepository::new();
        for fs in fses {
            repo.insert(fs).unwrap();
        }
        repo
    }

    fn root_like_fs(name: &str) -> FilesystemInfo {
        let mut fs = FilesystemInfo::new(name);
        for p in [
            "./var", "./usr", "./run", "./bin", "./sbin", "./etc", "./home", "./lib",
        ] {
            fs.insert_path(p.to_string());
        }
        fs
    }

    #[test]
    fn could_be_root_requires_threshold_markers() {
        let fs = root_like_fs("root");
        assert!(could_be_root(&fs));

        let mut sparse = FilesystemInfo::new("sparse");
        sparse.insert_path("./bin".to_string());
        assert!(!could_be_root(&sparse));
    }

    #[test]
    fn single_root_needs_no_mounts() {
        let root = root_like_fs("root");
        let repo = repo_with(vec![root]);
        let mounts = unify(&repo).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts.get(ROOT_MOUNT), Some(&"root".to_string()));
    }

    #[test]
    fn mounts_overlay_to_resolve_reference() {
        let mut root = root_like_fs("root");
        root.insert_path("./mnt".to_string());
        root.insert_reference("/mnt/data/app/config.cfg".to_string());

        let mut overlay = FilesystemInfo::new("overlay");
        overlay.insert_path("./data/app/config.cfg".to_string());

        let repo = repo_with(vec![root, overlay]);
        let mounts = unify(&repo).unwrap();
        assert_eq!(mounts.get("./mnt/"), Some(&"overlay".to_string()));
    }

    #[test]
    fn symlink_redirects_effective_mount_point() {
        let mut root = root_like_fs("root");
        root.insert_link("./etc/config".to_string(), "./real_config".to_string());
        root.insert_reference("/etc/config/app/settings.ini".to_string());

        let mut overlay = FilesystemInfo::new("overlay");
        overlay.insert_path("./app/settings.ini".to_string());

        let repo = repo_with(vec![root, overlay]);
        let mounts = unify(&repo).unwrap();
        // Mounting at "./etc/config/" would be rewritten through the
        // symlink to "./real_config/".
        assert!(mounts.contains_key("./real_config/"));
        assert!(!mounts.contains_key("./etc/config/"));
    }

    #[test]
    fn rejects_mount_that_would_shadow_too_much() {
        let mut root = root_like_fs("root");
        root.insert_path("./opt".to_string());
        for i in 0..8 {
            root.insert_path(format!("./opt/existing{i}"));
        }
        root.insert_reference("/opt/data/app/config.cfg".to_string());

        let mut overlay = FilesystemInfo::new("overlay");
        overlay.insert_path("./data/app/config.cfg".to_string());

        let repo = repo_with(vec![root, overlay]);
        let mounts = unify(&repo).unwrap();
        // Mounting the overlay at "./opt/" would shadow 9 existing paths
        // (> 5), so the search should leave it unmounted.
        assert!(!mounts.contains_key("./opt/"));
    }

    #[test]
    fn is_valid_mount_point_rejects_invalid_roots() {
        let mounts = MountMap::new();
        assert!(!is_valid_mount_point("./proc/", &mounts));
        assert!(!is_valid_mount_point("./proc/self/", &mounts));
        assert!(!is_valid_mount_point("./tmp/", &mounts));
        assert!(is_valid_mount_point("./mnt/", &mounts));
    }

    #[test]
    fn parallel_search_matches_sequential() {
        let mut root = root_like_fs("root");
        root.insert_path("./mnt".to_string());
        root.insert_reference("/mnt/data/app/config.cfg".to_string());

        let mut overlay = FilesystemInfo::new("overlay");
        overlay.insert_path("./data/app/config.cfg".to_string());

        let repo = repo_with(vec![root, overlay]);
        assert_eq!(unify(&repo), unify_parallel(&repo));
    }

    #[test]
    fn is_valid_mount_point_rejects_nested_existing() {
        let mut mounts = MountMap::new();
        mounts.insert("./mnt/data/".to_string(), "fs".to_string());
        assert!(!is_valid_mount_point("./mnt/".to_string().as_str(), &mounts));
    }
}

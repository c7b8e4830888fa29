// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

const EXCLUDED_SUFFIXES: [&str; 6] = [
    "_extract",
    ".uncompressed",
    ".unknown",
    "0.tar",
    "cpio-root",
    "squashfs-root",
];
const EXCLUDED_PREFIXES: [&str; 2] = ["squashfs-root-", "cpio-root-"];

const KEY_DIRS: [&str; 5] = ["bin", "etc", "lib", "usr", "var"];
const CRITICAL_FILES: [&str; 2] = ["bin/sh", "etc/passwd"];

/// One extracted subtree under an extractor's output directory, with the
/// cumulative statistics used to rank it against its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub nfiles: u64,
    pub executables: u64,
    pub is_root_like: bool,
}

/// Walks every directory under `extractor_output`, at any depth, and ranks
/// each surviving one as a candidate filesystem, ordered `is_root_like`
/// desc, `executables` desc, `size` desc. unblob/binwalk routinely nest
/// extraction results several levels deep, so a root filesystem is not
/// necessarily a direct child of the extractor's output directory.
/// Directories matching [`is_excluded_name`] are pruned from the walk
/// entirely: neither they nor anything beneath them becomes a candidate or
/// contributes to an ancestor's stats.
pub fn find_candidates(extractor_output: &Path, min_executables: u64) -> Result<Vec<Candidate>> {
    std::fs::metadata(extractor_output)
        .with_context(|| format!("failed to read {}", extractor_output.display()))?;

    let mut candidates = Vec::new();

    let walker = WalkDir::new(extractor_output)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_excluded_name(entry.path()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.into_path();

        let stats = walk_stats(&path);
        let is_root_like = classify_root_like(&path);
        if is_root_like && stats.executables < min_executables {
            continue;
        }

        candidates.push(Candidate {
            path,
            size: stats.size,
            nfiles: stats.nfiles,
            executables: stats.executables,
            is_root_like,
        });
    }

    candidates.sort_by(|a, b| {
        b.is_root_like
            .cmp(&a.is_root_like)
            .then_with(|| b.executables.cmp(&a.executables))
            .then_with(|| b.size.cmp(&a.size))
    });
    Ok(candidates)
}

#[derive(Debug, Default)]
struct Stats {
    size: u64,
    nfiles: u64,
    executables: u64,
}

fn walk_stats(path: &Path) -> Stats {
    let mut stats = Stats::default();
    let walker = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.path() == path || !is_excluded_name(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry while scanning candidate");
                continue;
            }
        };
        if entry.path() == path || entry.file_type().is_dir() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "skipping unreadable entry while scanning candidate");
                continue;
            }
        };

        stats.nfiles += 1;
        stats.size += metadata.len();
        if !entry.file_type().is_symlink() && metadata.permissions().mode() & 0o111 != 0 {
            stats.executables += 1;
        }
    }
    stats
}

/// Whether `candidate` has enough of the root-filesystem markers present at
/// its own top level to be considered a plausible root, per the finder's
/// coarse ranking heuristic (distinct from the unifier's stricter
/// `could_be_root`).
fn classify_root_like(candidate: &Path) -> bool {
    let mut markers = 0usize;
    for dir in KEY_DIRS {
        if candidate.join(dir).exists() {
            markers += 1;
        }
    }
    for file in CRITICAL_FILES {
        if candidate.join(file).exists() {
            markers += 1;
        }
    }
    let total = KEY_DIRS.len() + CRITICAL_FILES.len();
    markers >= (total + 1) / 2
}

fn is_excluded_name(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return false;
    };
    EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        || EXCLUDED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_executable(path: &Path) {
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }

    #[test]
    fn classifies_plausible_root_as_root_like() {
        let root = tempdir().unwrap();
        let candidate = root.path().join("rootfs");
        for dir in ["bin", "etc", "lib", "usr", "var"] {
            std::fs::create_dir_all(candidate.join(dir)).unwrap();
        }
        std::fs::write(candidate.join("etc/passwd"), b"root:x:0:0\n").unwrap();
        std::fs::write(candidate.join("bin/sh"), b"binary").unwrap();
        make_executable(&candidate.join("bin/sh"));

        // Every directory in the tree is evaluated, so the five key
        // subdirectories also surface as (non-root-like) candidates
        // alongside `rootfs` itself.
        let candidates = find_candidates(root.path(), 1).unwrap();
        assert_eq!(candidates.len(), 6);
        let root_candidate = candidates
            .iter()
            .find(|c| c.path == candidate)
            .expect("rootfs itself must be a candidate");
        assert!(root_candidate.is_root_like);
        assert_eq!(candidates.iter().filter(|c| c.is_root_like).count(), 1);
    }

    #[test]
    fn rejects_root_like_with_too_few_executables() {
        let root = tempdir().unwrap();
        let candidate = root.path().join("rootfs");
        for dir in ["bin", "etc", "lib", "usr", "var"] {
            std::fs::create_dir_all(candidate.join(dir)).unwrap();
        }
        std::fs::write(candidate.join("etc/passwd"), b"root:x:0:0\n").unwrap();
        std::fs::write(candidate.join("bin/sh"), b"binary").unwrap();
        // No execute bit set: stays below the default threshold. The key
        // subdirectories still surface as non-root-like candidates (the
        // executable floor only gates root-like ones), so `rootfs` itself
        // must be the one thing missing from the result.
        let candidates = find_candidates(root.path(), 10).unwrap();
        assert!(!candidates.iter().any(|c| c.path == candidate));
        assert!(!candidates.iter().any(|c| c.is_root_like));
    }

    #[test]
    fn excludes_extractor_scratch_directories() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("unblob_extract")).unwrap();
        std::fs::create_dir_all(root.path().join("squashfs-root-1")).unwrap();
        std::fs::create_dir_all(root.path().join("data")).unwrap();
        std::fs::write(root.path().join("data/file.bin"), b"x").unwrap();

        let candidates = find_candidates(root.path(), 0).unwrap();
        let names: Vec<&str> = candidates
            .iter()
            .map(|c| c.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["data"]);
    }

    #[test]
    fn orders_by_root_like_then_executables_then_size() {
        let root = tempdir().unwrap();

        let plain = root.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::write(plain.join("big.bin"), vec![0u8; 1000]).unwrap();

        let rootish = root.path().join("rootish");
        for dir in ["bin", "etc", "lib", "usr", "var"] {
            std::fs::create_dir_all(rootish.join(dir)).unwrap();
        }
        std::fs::write(rootish.join("etc/passwd"), b"x").unwrap();
        std::fs::write(rootish.join("bin/sh"), b"x").unwrap();
        make_executable(&rootish.join("bin/sh"));

        // `rootish`'s key subdirectories also surface as candidates now, so
        // rank by position rather than assuming only the two top-level
        // directories were found.
        let candidates = find_candidates(root.path(), 0).unwrap();
        let pos = |p: &PathBuf| candidates.iter().position(|c| &c.path == p).unwrap();

        assert_eq!(candidates[0].path, rootish);
        assert!(candidates[0].is_root_like);
        assert!(candidates[1..].iter().all(|c| !c.is_root_like));

        // Among the non-root-like candidates, `rootish/bin` has one
        // executable and outranks everything without one, including `plain`
        // despite its larger size.
        assert!(pos(&rootish.join("bin")) < pos(&plain));

        // Among the remaining zero-executable candidates, size still breaks
        // the tie.
        assert!(pos(&plain) < pos(&rootish.join("etc")));
        assert!(pos(&plain) < pos(&rootish.join("lib")));
        assert!(pos(&plain) < pos(&rootish.join("usr")));
        assert!(pos(&plain) < pos(&rootish.join("var")));
    }
}

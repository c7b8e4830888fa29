// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use archive::{extract_without_overwrite, write_archive};
use fileutil::{SafeTempDir, SafeTempDirBuilder};
use model::MountMap;

/// Materializes the unified tree described by `mounts` and archives it to
/// `dest`: a scratch directory is extracted into mount-point order
/// (shortest first, so an inner mount never clobbers a file the root
/// extraction already placed at the same spot — enforced by
/// [`archive::extract_without_overwrite`]), archived, then removed.
///
/// `archive_paths` maps every filesystem name appearing as a `MountMap`
/// value to the per-candidate `tar.gz` the loader originally read it from.
/// `scratch_base`, if given, is the directory the scratch tree is created
/// under (defaults to the system temp directory).
pub fn render(
    mounts: &MountMap,
    archive_paths: &BTreeMap<String, PathBuf>,
    dest: &Path,
    scratch_base: Option<&Path>,
) -> Result<()> {
    let scratch = match scratch_base {
        Some(base) => SafeTempDirBuilder::new().base_dir(base).build(),
        None => SafeTempDir::new(),
    }
    .context("failed to create scratch directory")?;

    let mut mount_points: Vec<&String> = mounts.keys().collect();
    mount_points.sort_by_key(|mp| mp.len());

    for mount_point in mount_points {
        let fs_name = &mounts[mount_point];
        let archive_path = archive_paths.get(fs_name).with_context(|| {
            format!("no archive path recorded for filesystem {fs_name}")
        })?;

        let rel = mount_point.strip_prefix("./").unwrap_or(mount_point);
        let target_dir = scratch.path().join(rel);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let file = File::open(archive_path)
            .with_context(|| format!("failed to open {}", archive_path.display()))?;
        extract_without_overwrite(file, &target_dir).with_context(|| {
            format!(
                "failed to extract {} into {}",
                archive_path.display(),
                target_dir.display()
            )
        })?;
    }

    write_archive(scratch.path(), dest).context("failed to write unified archive")?;
    Ok(())
}

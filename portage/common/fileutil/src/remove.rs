// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use std::fs::{metadata, remove_dir_all, remove_file, set_permissions, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

const S_IRWXU: u32 = 0o700;

/// Runs `action` after adding `permissions` to `path`. Restores the original permissions
/// afterwards, regardless of whether `action` succeeded.
fn with_permissions(
    path: &Path,
    permissions: u32,
    action: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let mode = metadata(path)?.mode();
    let new_mode = mode | permissions;

    if mode != new_mode {
        set_permissions(path, Permissions::from_mode(new_mode)).with_context(|| {
            format!("Failed to set permissions for {:?} to {:o}", path, new_mode)
        })?;
    }

    let result = action();

    if mode != new_mode {
        set_permissions(path, Permissions::from_mode(mode)).with_context(|| {
            format!("Failed to restore permissions of {:?} to {:o}", path, mode)
        })?;
    }

    result
}

/// Calls `remove_file` after ensuring we have `u+rwx` on the parent directory, and restores
/// its original permissions afterwards.
pub fn remove_file_with_chmod(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap();
    with_permissions(parent, S_IRWXU, || {
        remove_file(path).with_context(|| format!("Failed to delete {:?}", path))
    })
}

/// Calls `remove_dir_all` after ensuring we have `u+rwx` on every directory so that we can
/// remove all its files, even ones extracted read-only from an archive.
pub fn remove_dir_all_with_chmod(path: &Path) -> Result<()> {
    if let Err(e) = metadata(path) {
        if e.kind() == std::io::ErrorKind::NotFound {
            return Ok(());
        }
        return Err(anyhow::Error::new(e));
    }

    for entry in WalkDir::new(path)
        .into_iter()
        // Listing a directory we have no permission to read fails; let remove_dir_all deal
        // with that case instead of aborting the walk here.
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let mode = entry.metadata()?.mode();
        if mode & S_IRWXU != S_IRWXU {
            let new_mode = mode | S_IRWXU;
            set_permissions(entry.path(), Permissions::from_mode(new_mode)).with_context(
                || format!("Failed to set permissions for {:?} to {:o}", path, new_mode),
            )?;
        }
    }

    let parent = path.parent().unwrap();
    with_permissions(parent, S_IRWXU, || {
        remove_dir_all(path).with_context(|| format!("Failed to delete {:?}", path))
    })
}

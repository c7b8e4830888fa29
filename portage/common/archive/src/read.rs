// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::EntryType;

/// Extracts a per-candidate archive into `dest_dir`, creating directories
/// as needed but refusing to overwrite an existing regular file or
/// symlink. The renderer extracts mount points in ascending path-length
/// order, so this is what keeps an inner mount from clobbering content an
/// outer (shorter) mount already placed in the same spot.
pub fn extract_without_overwrite(reader: impl Read, dest_dir: &Path) -> Result<()> {
    let decoder = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);

    for entry_result in archive.entries().context("failed to read tar entries")? {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable tar entry during extraction");
                continue;
            }
        };
        let raw_path = match entry.path() {
            Ok(path) => path.into_owned(),
            Err(err) => {
                tracing::warn!(error = %err, "skipping tar entry with unreadable path");
                continue;
            }
        };
        if raw_path.as_os_str() == "." {
            continue;
        }
        let target = dest_dir.join(&raw_path);

        let result = match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display())),
            EntryType::Regular => extract_leaf(&mut entry, &target),
            EntryType::Symlink | EntryType::Link => extract_leaf(&mut entry, &target),
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::warn!(path = %target.display(), error = %err, "skipping entry during extraction");
        }
    }

    Ok(())
}

fn extract_leaf<R: Read>(entry: &mut tar::Entry<'_, R>, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if target.symlink_metadata().is_ok() {
        return Ok(());
    }
    entry
        .unpack(target)
        .with_context(|| format!("failed to extract {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_archive;
    use tempfile::tempdir;

    #[test]
    fn extracts_directories_files_and_symlinks() {
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("bin")).unwrap();
        std::fs::write(src.path().join("bin/sh"), b"binary").unwrap();

        let archive_path = src.path().join("fs.tar.gz");
        write_archive(src.path(), &archive_path).unwrap();

        let dest = tempdir().unwrap();
        let file = fs::File::open(&archive_path).unwrap();
        extract_without_overwrite(file, dest.path()).unwrap();

        assert!(dest.path().join("bin/sh").is_file());
        assert_eq!(
            fs::read(dest.path().join("bin/sh")).unwrap(),
            b"binary"
        );
    }

    #[test]
    fn does_not_overwrite_existing_regular_file() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("etc"), b"from-candidate").unwrap();
        let archive_path = src.path().join("fs.tar.gz");
        write_archive(src.path(), &archive_path).unwrap();

        let dest = tempdir().unwrap();
        fs::write(dest.path().join("etc"), b"from-root").unwrap();

        let file = fs::File::open(&archive_path).unwrap();
        extract_without_overwrite(file, dest.path()).unwrap();

        assert_eq!(fs::read(dest.path().join("etc")).unwrap(), b"from-root");
    }
}

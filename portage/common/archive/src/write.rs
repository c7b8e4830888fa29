// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::{Compression, GzBuilder};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

/// 2019-01-01T00:00:00Z, the fixed mtime every entry in a candidate or
/// unified archive carries so that archiving the same tree twice produces
/// byte-identical output.
const FIXED_MTIME: u64 = 1_546_300_800;
const ROOT_MODE: u32 = 0o755;
const OUTPUT_MODE: u32 = 0o644;

const EXCLUDED_NAMES: [&str; 2] = ["0.tar", "squashfs-root"];
const EXCLUDED_SUFFIXES: [&str; 3] = ["_extract", ".uncompressed", ".unknown"];

/// Archives `src_dir` into a deterministic `tar.gz` at `dest`: sorted entry
/// order, fixed mtime, no extended attributes, the fixed exclude list, and
/// a root entry forced to mode `0o755`.
pub fn write_archive(src_dir: &Path, dest: &Path) -> Result<()> {
    let file =
        File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let gz_writer = GzBuilder::new().mtime(0).write(file, Compression::default());
    let mut builder = Builder::new(gz_writer);

    write_root_entry(&mut builder)?;

    let walker = WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() == src_dir || !is_excluded(entry, src_dir));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry while archiving");
                continue;
            }
        };
        if entry.path() == src_dir {
            continue;
        }
        if let Err(err) = append_entry(&mut builder, src_dir, &entry) {
            tracing::warn!(path = %entry.path().display(), error = %err, "skipping entry while archiving");
        }
    }

    let gz_writer = builder.into_inner().context("failed to finish tar stream")?;
    gz_writer.finish().context("failed to finish gzip stream")?;

    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(OUTPUT_MODE))
        .with_context(|| format!("failed to set mode on {}", dest.display()))?;

    Ok(())
}

/// Whether `entry` (and, if a directory, its whole subtree) must be left
/// out of the archive: `./dev` at the archive root, or anything matching
/// the fixed name/suffix exclude lists anywhere in the tree.
fn is_excluded(entry: &walkdir::DirEntry, root: &Path) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name == "dev" && entry.path().parent() == Some(root) {
        return true;
    }
    if EXCLUDED_NAMES.contains(&name.as_ref()) {
        return true;
    }
    EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn write_root_entry<W: io::Write>(builder: &mut Builder<W>) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(ROOT_MODE);
    header.set_mtime(FIXED_MTIME);
    builder
        .append_data(&mut header, ".", io::empty())
        .context("failed to write root entry")?;
    Ok(())
}

fn append_entry<W: io::Write>(
    builder: &mut Builder<W>,
    src_dir: &Path,
    entry: &walkdir::DirEntry,
) -> Result<()> {
    let rel = entry.path().strip_prefix(src_dir)?;
    let file_type = entry.file_type();

    let mut header = Header::new_gnu();
    header.set_mtime(FIXED_MTIME);

    if file_type.is_symlink() {
        let target = std::fs::read_link(entry.path())?;
        let metadata = std::fs::symlink_metadata(entry.path())?;
        header.set_mode(metadata.mode() & 0o7777);
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, rel, target)?;
    } else if file_type.is_dir() {
        let metadata = entry.metadata()?;
        header.set_mode(metadata.mode() & 0o7777);
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, rel, io::empty())?;
    } else if file_type.is_file() {
        let metadata = entry.metadata()?;
        header.set_mode(metadata.mode() & 0o7777);
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.size());
        let mut f = File::open(entry.path())?;
        builder.append_data(&mut header, rel, &mut f)?;
    }
    // Device nodes and FIFOs are not produced by the extractors this crate
    // consumes and are silently skipped.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn read_back(path: &Path) -> Vec<(String, tar::EntryType, u64)> {
        let file = File::open(path).unwrap();
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let entry = e.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                (path, entry.header().entry_type(), entry.header().mtime().unwrap())
            })
            .collect()
    }

    #[test]
    fn produces_sorted_deterministic_entries() {
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("bin")).unwrap();
        std::fs::write(src.path().join("bin/sh"), b"binary").unwrap();
        std::fs::create_dir(src.path().join("etc")).unwrap();
        std::fs::write(src.path().join("etc/passwd"), b"root:x:0:0\n").unwrap();

        let dest = src.path().join("out.tar.gz");
        write_archive(src.path(), &dest).unwrap();

        let entries = read_back(&dest);
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec![".", "bin", "bin/sh", "etc", "etc/passwd"]);
        assert!(entries.iter().all(|(_, _, mtime)| *mtime == FIXED_MTIME));

        let mode = File::open(&dest).unwrap().metadata().unwrap().mode() & 0o7777;
        assert_eq!(mode, OUTPUT_MODE);
    }

    #[test]
    fn excludes_dev_and_extract_suffixes() {
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("dev")).unwrap();
        std::fs::write(src.path().join("dev/null"), b"").unwrap();
        std::fs::create_dir(src.path().join("unblob_extract")).unwrap();
        std::fs::write(src.path().join("unblob_extract/x"), b"").unwrap();
        std::fs::create_dir(src.path().join("bin")).unwrap();
        std::fs::write(src.path().join("bin/sh"), b"binary").unwrap();

        let dest = src.path().join("out.tar.gz");
        write_archive(src.path(), &dest).unwrap();

        let entries = read_back(&dest);
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert!(!names.iter().any(|n| n.starts_with("dev")));
        assert!(!names.iter().any(|n| n.starts_with("unblob_extract")));
        assert!(names.contains(&"bin/sh"));
    }

    #[test]
    fn preserves_symlinks() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("real"), b"data").unwrap();
        symlink("real", src.path().join("link")).unwrap();

        let dest = src.path().join("out.tar.gz");
        write_archive(src.path(), &dest).unwrap();

        let entries = read_back(&dest);
        let link_entry = entries.iter().find(|(n, _, _)| n == "link").unwrap();
        assert_eq!(link_entry.1, tar::EntryType::Symlink);
    }

    #[test]
    fn root_entry_has_fixed_mode() {
        let src = tempdir().unwrap();
        let dest = src.path().join("out.tar.gz");
        write_archive(src.path(), &dest).unwrap();

        let file = File::open(&dest).unwrap();
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        let mut entries = archive.entries().unwrap();
        let root = entries.next().unwrap().unwrap();
        assert_eq!(root.path().unwrap().to_string_lossy(), ".");
        assert_eq!(root.header().mode().unwrap() & 0o7777, ROOT_MODE);
    }
}

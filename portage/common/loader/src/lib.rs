// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reads a per-candidate `tar.gz` and builds a [`model::FilesystemInfo`]:
//! the set of paths, symlinks, and references discovered inside file
//! contents (ELF dynamic entries and a regex string scan).

mod elf;
mod reference;
mod strings;

pub use reference::passes_reference_filter;

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use model::FilesystemInfo;
use tar::EntryType;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const SKIPPED_EXTENSIONS: [&str; 4] = [".html", ".htm", ".css", ".js"];

/// Builds a [`FilesystemInfo`] named `name` from the contents of a
/// `tar.gz` stream produced by the candidate archiver.
pub fn load_filesystem(name: &str, reader: impl Read) -> Result<FilesystemInfo> {
    let decoder = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);
    let mut fs = FilesystemInfo::new(name);

    let entries = archive.entries().context("failed to read tar entries")?;
    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable tar entry");
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
        let Some(path) = normalize_member_path(&raw_path) else {
            continue;
        };

        let size = entry.header().size().unwrap_or(0);
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Symlink | EntryType::Link => {
                let target = match entry.link_name() {
                    Ok(Some(target)) => target.to_string_lossy().into_owned(),
                    Ok(None) => {
                        tracing::warn!(path, "symlink entry has no link name");
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(path, error = %err, "failed to read link name");
                        continue;
                    }
                };
                fs.insert_link(path, target);
                fs.size += size;
            }
            EntryType::Directory => {
                fs.insert_path(path);
                fs.size += size;
            }
            EntryType::Regular => {
                fs.insert_path(path.clone());
                fs.size += size;

                let mut content = Vec::new();
                if let Err(err) = entry.read_to_end(&mut content) {
                    tracing::warn!(path, error = %err, "failed to read file contents");
                    continue;
                }
                for reference in extract_references(&path, &content) {
                    fs.insert_reference(reference);
                }
            }
            _ => {
                // Character/block devices and FIFOs carry no path or
                // reference information we care about.
            }
        }
    }

    Ok(fs)
}

/// Normalizes a raw tar member path to the archive-relative convention used
/// throughout the data model: begins with `./`, never ends with `/`.
/// Returns `None` for the root entry itself (name `.`), which the loader
/// skips.
fn normalize_member_path(path: &Path) -> Option<String> {
    let raw = path.to_string_lossy().replace('\\', "/");
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    let normalized = if let Some(rest) = trimmed.strip_prefix("./") {
        format!("./{rest}")
    } else if let Some(rest) = trimmed.strip_prefix('/') {
        format!("./{rest}")
    } else {
        format!("./{trimmed}")
    };
    Some(normalized)
}

/// Extracts referenced paths from one member's content: ELF dynamic-section
/// entries when the content looks like an ELF, otherwise a regex scan over
/// the UTF-8 interpretation of the bytes.
fn extract_references(member_name: &str, content: &[u8]) -> BTreeSet<String> {
    if content.starts_with(&ELF_MAGIC) {
        match elf::dynamic_references(content) {
            Ok(refs) => return refs,
            Err(err) => {
                tracing::debug!(member_name, error = %err, "ELF parse failed, falling back to string scan");
            }
        }
    }

    if SKIPPED_EXTENSIONS.iter().any(|ext| member_name.ends_with(ext)) {
        return BTreeSet::new();
    }

    let Ok(text) = std::str::from_utf8(content) else {
        return BTreeSet::new();
    };
    strings::scan_references(text)
}

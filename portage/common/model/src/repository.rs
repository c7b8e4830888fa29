// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::filesystem::FilesystemInfo;

/// An immutable-once-loaded set of [`FilesystemInfo`] records, indexed by
/// name. Single-writer during loading, read-only during unification.
#[derive(Debug, Default)]
pub struct FilesystemRepository {
    filesystems: BTreeMap<String, FilesystemInfo>,
}

impl FilesystemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filesystem to the repository. Fails if a filesystem with the
    /// same name was already inserted.
    pub fn insert(&mut self, fs: FilesystemInfo) -> Result<()> {
        if self.filesystems.contains_key(&fs.name) {
            bail!("duplicate filesystem name: {}", fs.name);
        }
        self.filesystems.insert(fs.name.clone(), fs);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FilesystemInfo> {
        self.filesystems.get(name)
    }

    /// Names in sorted order, for deterministic iteration.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filesystems.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilesystemInfo)> {
        self.filesystems.iter()
    }

    pub fn len(&self) -> usize {
        self.filesystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filesystems.is_empty()
    }
}

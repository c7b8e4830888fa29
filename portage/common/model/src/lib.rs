// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The data model shared by fsunify's loader, unifier and renderer.
//!
//! A [`FilesystemInfo`] describes one candidate filesystem extracted from a
//! firmware image. A [`FilesystemRepository`] owns every candidate found for
//! a given run. A [`MountMap`] is the search state the unifier builds up:
//! which candidate is grafted at which mount point. [`RealizedView`] and
//! [`visible_paths`] derive, from a `MountMap`, what the merged tree would
//! actually look like once shadowing between mounts is taken into account.

mod filesystem;
mod mount;
mod repository;

pub use filesystem::FilesystemInfo;
pub use mount::{join_mount, unresolved_references, visible_paths, MountMap, RealizedView};
pub use repository::FilesystemRepository;

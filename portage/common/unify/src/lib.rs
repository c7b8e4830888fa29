// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Candidate discovery, the unification search, and unified-tree rendering.
//!
//! [`find_candidates`] ranks the subtrees an extractor produced. [`unify`]
//! runs the greedy recursive search over a [`model::FilesystemRepository`]
//! and returns the best [`model::MountMap`] found. [`render`] materializes
//! that mount map as a single deterministic `tar.gz`.

mod finder;
mod render;
mod search;
mod symlinks;

pub use finder::{find_candidates, Candidate};
pub use render::render;
pub use search::{could_be_root, configuration_score, try_unify_from, unify, unify_parallel};

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deterministic `tar.gz` archiving and no-overwrite extraction, shared by
//! the candidate archiver and the unified-tree renderer.

mod read;
mod write;

pub use read::extract_without_overwrite;
pub use write::write_archive;

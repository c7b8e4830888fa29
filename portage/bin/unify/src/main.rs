// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `unify`: reconstructs a single coherent root filesystem from a directory
//! of per-candidate `tar.gz` archives produced by extractors such as
//! `unblob` and `binwalk` (see the `fw2tar` binary, which drives those
//! extractors and calls into the same `unify` library this binary wraps).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use model::FilesystemRepository;

/// Unify extracted firmware filesystems into a single deterministic tar.gz.
#[derive(Parser)]
struct Args {
    /// A directory of candidate `*.tar.gz` archives, or a single such
    /// archive whose sibling directory is scanned.
    input_path: PathBuf,

    /// Where to write the unified `tar.gz`.
    output_path: PathBuf,

    /// Scratch directory used while rendering the unified tree. Defaults to
    /// the system temporary directory.
    tmp_dir: Option<PathBuf>,

    /// Overwrite `output_path` if it already exists.
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    cliutil::cli_main(run, Default::default())
}

fn run() -> Result<()> {
    let args = Args::parse();

    if args.output_path.exists() {
        ensure!(
            args.force,
            "output path {} already exists (use --force to overwrite)",
            args.output_path.display()
        );
        fs::remove_file(&args.output_path).with_context(|| {
            format!("failed to remove existing {}", args.output_path.display())
        })?;
    }

    let archive_paths = candidate_archives(&args.input_path)?;
    ensure!(
        !archive_paths.is_empty(),
        "no candidate archives found under {}",
        args.input_path.display()
    );

    let mut repo = FilesystemRepository::new();
    for (name, path) in &archive_paths {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let fs_info = loader::load_filesystem(name, file)
            .with_context(|| format!("failed to load {}", path.display()))?;
        repo.insert(fs_info)?;
    }

    let mounts = unify::unify(&repo)
        .context("no candidate filesystem looks like a plausible root filesystem")?;

    for (mount_point, fs_name) in &mounts {
        println!("{mount_point}: {fs_name}");
    }

    unify::render(
        &mounts,
        &archive_paths,
        &args.output_path,
        args.tmp_dir.as_deref(),
    )?;
    Ok(())
}

/// Collects `archive filename -> path` for every candidate implied by
/// `input_path`: a directory of `*.tar.gz`, or a single archive
/// whose directory is scanned using the archive's own name (minus
/// `.tar.gz`) as a prefix, matching `unifyroot`'s glob-by-stripped-suffix
/// behavior.
fn candidate_archives(input_path: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let (dir, prefix) = if input_path.is_dir() {
        (input_path.to_path_buf(), None)
    } else {
        let full = input_path.to_string_lossy();
        let Some(base) = full.strip_suffix(".tar.gz") else {
            bail!(
                "{} is neither a directory nor a .tar.gz file",
                input_path.display()
            );
        };
        let base_path = PathBuf::from(base);
        let dir = base_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let prefix = base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        (dir, prefix)
    };

    let mut archives = BTreeMap::new();
    let entries =
        fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.ends_with(".tar.gz") {
            continue;
        }
        if let Some(prefix) = &prefix {
            if !name.starts_with(prefix.as_str()) {
                continue;
            }
        }
        archives.insert(name, path);
    }
    Ok(archives)
}

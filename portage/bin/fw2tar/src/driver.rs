// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs the configured extractors concurrently, one child process per
//! extractor, each watched from its own OS thread so the driver can wait on
//! all of them without blocking on any single one — the `processes::run`
//! idiom generalized to a small pool of children with a shared deadline
//! instead of a single foreground child.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);
pub const DEFAULT_FOLLOW_UP_WAIT: Duration = Duration::from_secs(120);

/// One extractor's output, once its child process has exited or been
/// killed for taking too long.
pub struct ExtractorRun {
    pub extractor: String,
    pub extract_dir: PathBuf,
    pub completed: bool,
}

struct Handle {
    extractor: String,
    extract_dir: PathBuf,
    child: Arc<Mutex<Child>>,
    cancelled: Arc<AtomicBool>,
}

/// Runs `extractors` against `infile` inside `scratch_dir`, one subdirectory
/// per extractor, with extractor logs written to
/// `<outfile_base>.<extractor>.log`.
///
/// Waits up to `max_wait` for the first extractor to finish, then at most
/// `follow_up_wait` more for the rest; any child still running after that
/// deadline is killed and its run reported as not completed.
pub fn run_extractors(
    extractors: &[String],
    infile: &Path,
    scratch_dir: &Path,
    outfile_base: &str,
    max_wait: Duration,
    follow_up_wait: Duration,
) -> Result<Vec<ExtractorRun>> {
    let mut handles = Vec::new();
    for extractor in extractors {
        let extract_dir = scratch_dir.join(extractor);
        std::fs::create_dir_all(&extract_dir)
            .with_context(|| format!("failed to create {}", extract_dir.display()))?;

        let log_path = format!("{outfile_base}.{extractor}.log");
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("failed to create {log_path}"))?;
        let log_file_err = log_file
            .try_clone()
            .with_context(|| format!("failed to duplicate {log_path}"))?;

        let mut cmd = build_command(extractor, infile, &extract_dir)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to start {extractor}"))?;

        handles.push(Handle {
            extractor: extractor.clone(),
            extract_dir,
            child: Arc::new(Mutex::new(child)),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
    }

    let (tx, rx) = mpsc::channel();
    let mut watchers = Vec::new();
    for handle in &handles {
        let child = Arc::clone(&handle.child);
        let cancelled = Arc::clone(&handle.cancelled);
        let extractor = handle.extractor.clone();
        let extract_dir = handle.extract_dir.clone();
        let tx = tx.clone();
        watchers.push(thread::spawn(move || loop {
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let exited = matches!(child.lock().unwrap().try_wait(), Ok(Some(_)));
            if exited {
                let _ = tx.send(ExtractorRun {
                    extractor,
                    extract_dir,
                    completed: true,
                });
                return;
            }
            thread::sleep(Duration::from_millis(200));
        }));
    }
    drop(tx);

    let start = Instant::now();
    let mut results = Vec::new();
    let remaining_after = |deadline: Instant| deadline.saturating_duration_since(Instant::now());

    while results.len() < handles.len() {
        let remaining = remaining_after(start + max_wait);
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(run) => results.push(run),
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if !results.is_empty() && results.len() < handles.len() {
        let follow_up_deadline = Instant::now() + follow_up_wait;
        while results.len() < handles.len() {
            let remaining = remaining_after(follow_up_deadline);
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(run) => results.push(run),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    let finished: std::collections::BTreeSet<&str> =
        results.iter().map(|r| r.extractor.as_str()).collect();
    for handle in &handles {
        if !finished.contains(handle.extractor.as_str()) {
            handle.cancelled.store(true, Ordering::SeqCst);
            let _ = handle.child.lock().unwrap().kill();
            results.push(ExtractorRun {
                extractor: handle.extractor.clone(),
                extract_dir: handle.extract_dir.clone(),
                completed: false,
            });
        }
    }

    for watcher in watchers {
        let _ = watcher.join();
    }

    results.sort_by(|a, b| a.extractor.cmp(&b.extractor));
    Ok(results)
}

fn build_command(extractor: &str, infile: &Path, extract_dir: &Path) -> Result<Command> {
    let cmd = match extractor {
        "unblob" => {
            let mut cmd = Command::new("unblob");
            cmd.arg("--extract-dir").arg(extract_dir).arg(infile);
            cmd
        }
        "binwalk" => {
            let mut cmd = Command::new("binwalk");
            cmd.arg("--run-as=root")
                .arg("--preserve-symlinks")
                .arg("-eM")
                .arg("-q")
                .arg(infile)
                .arg("-C")
                .arg(extract_dir);
            cmd
        }
        other => bail!("unknown extractor: {other}"),
    };
    Ok(cmd)
}

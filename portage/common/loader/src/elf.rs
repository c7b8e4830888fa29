// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use elf::abi::{DT_NEEDED, DT_RPATH, DT_RUNPATH};
use elf::endian::AnyEndian;
use elf::ElfBytes;

/// `DT_NEEDED` entries plus an optional `DT_RPATH`/`DT_RUNPATH` and
/// `.interp` target, recovered independently of each other: a binary can
/// carry a `.dynamic` section without a `.interp` section (PIE with needed
/// libs) or vice versa (a standalone loader).
#[derive(Debug, Default, PartialEq, Eq)]
struct DynamicInfo {
    needed: Vec<String>,
    rpath: Option<String>,
    interp: Option<String>,
}

/// Extracts the references an ELF's dynamic linking metadata implies: one
/// or two candidate library paths per `DT_NEEDED` entry, plus the `.interp`
/// target verbatim. Returns `Err` only on a malformed ELF header, which the
/// caller treats as a signal to fall back to the string scan.
pub fn dynamic_references(content: &[u8]) -> Result<BTreeSet<String>> {
    let info = parse_dynamic_info(content)?;
    Ok(expand_dynamic_info(&info))
}

fn parse_dynamic_info(data: &[u8]) -> Result<DynamicInfo> {
    let elf = ElfBytes::<AnyEndian>::minimal_parse(data).context("invalid ELF header")?;
    let mut info = DynamicInfo::default();

    if let Ok(Some(dynamic)) = elf.dynamic() {
        if let Some(dynstr_hdr) = elf.section_header_by_name(".dynstr").ok().flatten() {
            if let Ok(strtab) = elf.section_data_as_strtab(&dynstr_hdr) {
                for entry in dynamic.iter() {
                    match entry.d_tag {
                        DT_NEEDED => {
                            if let Ok(name) = strtab.get(entry.d_un as usize) {
                                info.needed.push(name.to_string());
                            }
                        }
                        DT_RPATH | DT_RUNPATH => {
                            if let Ok(path) = strtab.get(entry.d_un as usize) {
                                info.rpath = Some(path.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    if let Some(interp_hdr) = elf.section_header_by_name(".interp").ok().flatten() {
        if let Ok((data, _)) = elf.section_data(&interp_hdr) {
            info.interp = decode_nul_terminated(data);
        }
    }

    Ok(info)
}

/// Decodes a NUL-padded section's content as UTF-8, trimming at the first
/// NUL byte. Returns `None` for empty or non-UTF-8 content.
fn decode_nul_terminated(bytes: &[u8]) -> Option<String> {
    let trimmed = bytes.split(|&b| b == 0).next().unwrap_or(&[]);
    if trimmed.is_empty() {
        return None;
    }
    std::str::from_utf8(trimmed).ok().map(str::to_string)
}

/// Turns one `DT_NEEDED` entry into its candidate resolved paths: used
/// verbatim if already absolute, otherwise `/lib` and `/usr/lib`, plus every
/// `rpath`-relative location if an `RPATH`/`RUNPATH` was present.
fn expand_needed(needed: &str, rpath: Option<&str>) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    if let Some(stripped) = needed.strip_prefix('/') {
        refs.insert(format!("/{stripped}"));
        return refs;
    }
    refs.insert(format!("/lib/{needed}"));
    refs.insert(format!("/usr/lib/{needed}"));
    if let Some(rpath) = rpath {
        for dir in rpath.split(':').filter(|d| !d.is_empty()) {
            refs.insert(format!("{}/{needed}", dir.trim_end_matches('/')));
        }
    }
    refs
}

fn expand_dynamic_info(info: &DynamicInfo) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for needed in &info.needed {
        refs.extend(expand_needed(needed, info.rpath.as_deref()));
    }
    if let Some(interp) = &info.interp {
        refs.insert(interp.clone());
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_nul_terminated_trims_padding() {
        let bytes = b"/lib64/ld-linux-x86-64.so.2\0\0\0";
        assert_eq!(
            decode_nul_terminated(bytes),
            Some("/lib64/ld-linux-x86-64.so.2".to_string())
        );
    }

    #[test]
    fn decode_nul_terminated_rejects_empty() {
        assert_eq!(decode_nul_terminated(b"\0\0\0"), None);
    }

    #[test]
    fn expand_needed_absolute_passes_through() {
        let refs = expand_needed("/opt/vendor/lib/libfoo.so", None);
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("/opt/vendor/lib/libfoo.so"));
    }

    #[test]
    fn expand_needed_bare_name_tries_both_libdirs() {
        let refs = expand_needed("libc.so.6", None);
        assert!(refs.contains("/lib/libc.so.6"));
        assert!(refs.contains("/usr/lib/libc.so.6"));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn expand_needed_honors_rpath() {
        let refs = expand_needed("libfoo.so", Some("/opt/vendor/lib:/opt/vendor/lib64"));
        assert!(refs.contains("/lib/libfoo.so"));
        assert!(refs.contains("/usr/lib/libfoo.so"));
        assert!(refs.contains("/opt/vendor/lib/libfoo.so"));
        assert!(refs.contains("/opt/vendor/lib64/libfoo.so"));
    }

    #[test]
    fn expand_dynamic_info_includes_interp() {
        let info = DynamicInfo {
            needed: vec!["libc.so.6".to_string()],
            rpath: None,
            interp: Some("/lib64/ld-linux-x86-64.so.2".to_string()),
        };
        let refs = expand_dynamic_info(&info);
        assert!(refs.contains("/lib64/ld-linux-x86-64.so.2"));
        assert!(refs.contains("/lib/libc.so.6"));
    }
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use model::is_well_formed_reference;

/// Characters the string scan must reject outright: shell/regex
/// metacharacters that show up in scripts and templates but never in a real
/// path.
const FORBIDDEN_CHARS: [char; 11] = ['^', '$', '%', '*', '{', '}', '`', '+', ',', '=', '\\'];

/// The stricter validity filter applied only to candidates the regex string
/// scan turns up. ELF-derived
/// references (`DT_NEEDED`, `.interp`) never go through this: `DT_NEEDED`
/// entries like `libc.so.6` resolve to `/lib/libc.so.6`, which has only two
/// slash-separated components and would otherwise be rejected by the
/// slash-count rule below.
pub fn passes_reference_filter(candidate: &str) -> bool {
    if !is_well_formed_reference(candidate) {
        return false;
    }
    if candidate.matches('/').count() < 3 {
        return false;
    }
    if candidate.starts_with("/www.") || candidate.contains(".com/") {
        return false;
    }
    if looks_like_ip_literal(candidate) {
        return false;
    }
    if candidate.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return false;
    }
    true
}

/// Whether the first non-empty path component looks like a dotted-quad IPv4
/// address (e.g. `/192.168.1.1/firmware.bin`), which is never a real
/// filesystem reference.
fn looks_like_ip_literal(candidate: &str) -> bool {
    let Some(first) = candidate.split('/').find(|s| !s.is_empty()) else {
        return false;
    };
    let octets: Vec<&str> = first.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|octet| !octet.is_empty() && octet.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plausible_path() {
        assert!(passes_reference_filter("/opt/vendor/resources/app.bin"));
    }

    #[test]
    fn rejects_short_component_count() {
        // Only one internal slash: must not pass even though it is
        // well-formed at the model layer.
        assert!(!passes_reference_filter("/lib/libc.so.6"));
    }

    #[test]
    fn rejects_ip_literal() {
        assert!(!passes_reference_filter("/192.168.1.1/update/firmware.bin"));
    }

    #[test]
    fn rejects_www_and_dot_com() {
        assert!(!passes_reference_filter("/www.example.com/a/b"));
        assert!(!passes_reference_filter("/go/example.com/pkg/mod"));
    }

    #[test]
    fn rejects_forbidden_characters() {
        assert!(!passes_reference_filter("/opt/vendor/app{1}/run.sh"));
        assert!(!passes_reference_filter("/opt/vendor/a=b/run.sh"));
    }
}

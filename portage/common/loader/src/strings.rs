// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::reference::passes_reference_filter;

lazy_static! {
    // A path-shaped run starting at a slash. The first component excludes
    // quoting/bracketing characters plus `: ? !`; later components also
    // exclude `( ) % ;`, since those commonly close off a path embedded in
    // shell or man-page-style text (`(see /etc/app)`, `exec /bin/app;`).
    // Still over-matches on purpose; `passes_reference_filter` does the
    // real filtering.
    static ref PATH_PATTERN: Regex =
        Regex::new(r#"/[^\s/\x00<>"'!:?]{3,255}(?:/[^\s/\x00<>()%"'!;:?]+)*"#).unwrap();
}

/// Scans decoded text for path-shaped substrings and keeps the ones that
/// pass the stricter reference filter.
pub fn scan_references(text: &str) -> BTreeSet<String> {
    PATH_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|candidate| passes_reference_filter(candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_embedded_path_in_script() {
        let text = "#!/bin/sh\nexec /opt/vendor/bin/run.sh --config /opt/vendor/etc/run.cfg\n";
        let refs = scan_references(text);
        assert!(refs.contains("/opt/vendor/bin/run.sh"));
        assert!(refs.contains("/opt/vendor/etc/run.cfg"));
        // "/bin/sh" only has two slash-separated components, so it is
        // filtered out even though the regex matches it.
        assert!(!refs.contains("/bin/sh"));
    }

    #[test]
    fn ignores_urls_and_ip_literals() {
        let text = "update server at /192.168.1.1/update/firmware.bin or www.example.com/x/y";
        let refs = scan_references(text);
        assert!(refs.is_empty());
    }

    #[test]
    fn stops_at_quotes_and_whitespace() {
        let text = r#"src="/opt/vendor/resources/app.bin" other text"#;
        let refs = scan_references(text);
        assert!(refs.contains("/opt/vendor/resources/app.bin"));
    }

    #[test]
    fn stops_at_colon_in_a_later_component() {
        let text = "exec /opt/foo/bar:8080/baz\n";
        let refs = scan_references(text);
        assert!(refs.contains("/opt/foo/bar"));
        assert!(!refs.contains("/opt/foo/bar:8080/baz"));
        assert!(!refs.iter().any(|r| r.contains(':')));
    }

    #[test]
    fn stops_at_closing_paren() {
        let text = "(see /etc/init.d/app)\n";
        let refs = scan_references(text);
        assert!(refs.contains("/etc/init.d/app"));
        assert!(!refs.iter().any(|r| r.contains(')')));
    }
}

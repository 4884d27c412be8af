//! Wrapper scripts for executables that need environment setup.

use std::path::{Path, PathBuf};

/// Marker line recording the real target, used for ownership checks.
pub const TARGET_MARKER: &str = "# provi-target: ";

/// Render a POSIX shell wrapper that exports `env` and execs `target`.
///
/// Values are double-quoted so `$PATH`-style references still expand.
pub fn render(target: &Path, env: &[(String, String)]) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(TARGET_MARKER);
    script.push_str(&target.to_string_lossy());
    script.push('\n');

    for (key, value) in env {
        script.push_str(&format!("export {}=\"{}\"\n", key, escape(value)));
    }

    script.push_str(&format!(
        "exec \"{}\" \"$@\"\n",
        escape(&target.to_string_lossy())
    ));
    script
}

/// The target recorded in a wrapper script, if `script` is one of ours.
pub fn parse_target(script: &str) -> Option<PathBuf> {
    script
        .lines()
        .take(3)
        .find_map(|line| line.strip_prefix(TARGET_MARKER))
        .map(|target| PathBuf::from(target.trim_end()))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

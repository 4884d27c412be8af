//! Asset selection and template resolution. Everything here is pure.

use crate::registry::{AssetBin, AssetDescriptor};

/// Suffix some registries use for glibc builds on Linux.
const GNU_SUFFIX: &str = "_gnu";

/// First asset whose target matches `target`. On Linux, a `_gnu` variant of
/// the target is tried when nothing matches exactly.
pub fn match_asset<'a>(assets: &'a [AssetDescriptor], target: &str) -> Option<&'a AssetDescriptor> {
    if let Some(asset) = assets.iter().find(|a| a.target.matches(target)) {
        return Some(asset);
    }
    if target.starts_with("linux_") {
        let gnu = format!("{}{}", target, GNU_SUFFIX);
        return assets.iter().find(|a| a.target.matches(&gnu));
    }
    None
}

/// Substitute the version into a file or path template.
///
/// Supports `{{version}}` (inner whitespace ignored) and
/// `{{version | strip_prefix "v"}}`. The filter only resolves when the
/// version starts with `v`. Any other token is left as written.
pub fn resolve_template(template: &str, version: &str) -> String {
    replace_tokens(template, |expr| resolve_version_expr(expr, version))
}

/// Resolve a registry `bin` template against the selected asset.
///
/// Handles `{{source.asset.file}}`, `{{source.asset.bin}}` and
/// `{{source.asset.bin.<name>}}`, then applies [`resolve_template`]. When the
/// asset declares several binaries and `bin_name` is not one of them, the
/// first declared binary is used.
pub fn resolve_bin_path(
    template: &str,
    asset: &AssetDescriptor,
    bin_name: &str,
    version: &str,
) -> String {
    let file = resolve_template(&asset.file, version);
    let with_file = |value: &str| {
        replace_tokens(value, |expr| {
            (expr == "source.asset.file").then(|| file.clone())
        })
    };

    let substituted = replace_tokens(template, |expr| {
        if expr == "source.asset.file" {
            return Some(file.clone());
        }
        let name = match expr.strip_prefix("source.asset.bin") {
            Some("") => bin_name,
            Some(rest) => rest.strip_prefix('.')?,
            None => return None,
        };
        asset_bin(asset, name).map(|v| with_file(&v))
    });

    resolve_template(&substituted, version)
}

fn asset_bin(asset: &AssetDescriptor, name: &str) -> Option<String> {
    match asset.bin.as_ref()? {
        AssetBin::Single(path) => Some(path.clone()),
        AssetBin::Named(paths) => paths.get(name).or_else(|| paths.values().next()).cloned(),
    }
}

fn resolve_version_expr(expr: &str, version: &str) -> Option<String> {
    if expr == "version" {
        return Some(version.to_string());
    }
    let (head, filter) = expr.split_once('|')?;
    if head.trim() != "version" || !is_strip_v_filter(filter.trim()) {
        return None;
    }
    version.strip_prefix('v').map(str::to_string)
}

fn is_strip_v_filter(filter: &str) -> bool {
    filter
        .strip_prefix("strip_prefix")
        .is_some_and(|arg| matches!(arg.trim(), "\"v\"" | "'v'"))
}

/// Replace every `{{ expr }}` for which `resolve` returns a value. `expr` is
/// passed trimmed; unresolved tokens are copied through verbatim.
fn replace_tokens(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len;
        out.push_str(&rest[..start]);

        match resolve(rest[start + 2..end].trim()) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }

    out.push_str(rest);
    out
}

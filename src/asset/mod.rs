//! Platform detection and release-asset selection.

mod platform;
mod resolver;

pub use platform::{Platform, detect_target, target_for};
pub use resolver::{match_asset, resolve_bin_path, resolve_template};

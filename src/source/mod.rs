//! Source identifiers.
//!
//! A package is named by a source id in one of two equivalent forms:
//! the legacy `pkg:<provider>/<packageId...>` and the current
//! `<provider>:<packageId...>`. Only the first separator is significant;
//! the package id may itself contain `/` and `:`.

use std::fmt;
use std::str::FromStr;

use crate::error::InstallError;
use crate::provider::ProviderKind;

/// Prefix of the legacy identifier form.
pub const LEGACY_PREFIX: &str = "pkg:";

/// Version sentinel meaning "resolve the newest version".
pub const LATEST: &str = "latest";

/// Rewrite a legacy identifier into the current form.
///
/// `pkg:cargo/ripgrep` becomes `cargo:ripgrep`. Input already in current form,
/// and legacy input without any `/` after the prefix, is returned unchanged.
pub fn normalize(raw: &str) -> String {
    match raw.strip_prefix(LEGACY_PREFIX) {
        Some(rest) => match rest.split_once('/') {
            Some((provider, package_id)) => format!("{}:{}", provider, package_id),
            None => raw.to_string(),
        },
        None => raw.to_string(),
    }
}

/// Split an identifier on its first `:` into `(provider, packageId)`.
///
/// An identifier without `:` yields an empty provider.
pub fn split(raw: &str) -> (&str, &str) {
    raw.split_once(':').unwrap_or(("", raw))
}

/// A parsed, validated package reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    provider: ProviderKind,
    package_id: String,
    raw: String,
}

impl PackageRef {
    /// Parse either identifier form. Rejects empty parts, unknown providers,
    /// and package ids that would escape their install directory.
    pub fn parse(raw: &str) -> Result<Self, InstallError> {
        let invalid = |reason: &str| InstallError::InvalidIdentifier {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.starts_with(LEGACY_PREFIX) && !trimmed[LEGACY_PREFIX.len()..].contains('/') {
            return Err(invalid("legacy identifier has no '/' after the provider"));
        }

        let normalized = normalize(trimmed);
        let (provider, package_id) = split(&normalized);
        if provider.is_empty() {
            return Err(invalid("missing provider"));
        }
        if package_id.is_empty() {
            return Err(invalid("missing package id"));
        }
        if package_id
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid("package id has an empty or relative path segment"));
        }

        let provider = provider
            .parse::<ProviderKind>()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            provider,
            package_id: package_id.to_string(),
            raw: raw.to_string(),
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    /// The identifier exactly as the caller supplied it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Current-form identifier, used as the key in the lockfile and registry.
    pub fn source_id(&self) -> String {
        format!("{}:{}", self.provider, self.package_id)
    }

    /// Last path segment of the package id (`owner/repo` -> `repo`).
    pub fn short_name(&self) -> &str {
        self.package_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.package_id)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.package_id)
    }
}

impl FromStr for PackageRef {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageRef::parse(s)
    }
}

/// Whether a requested version still needs resolving.
pub fn is_unresolved(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version == LATEST
}

//! Package registry model.
//!
//! Registry entries are read-only metadata describing where a package comes
//! from, which per-platform assets it publishes and which executables it
//! exposes. Fields that the JSON encodes as "a string or a collection" are
//! decoded once into tagged variants.

mod cache;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use cache::RegistryIndex;

/// One registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    /// Version the registry declares as current; may be empty.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub source: RegistrySource,
    /// Exposed name -> path template.
    #[serde(default)]
    pub bin: BTreeMap<String, String>,
}

impl RegistryEntry {
    pub fn has_assets(&self) -> bool {
        !self.source.assets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySource {
    pub id: String,
    #[serde(default, rename = "asset", skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetDescriptor>,
}

/// One per-platform downloadable artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub target: Target,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<AssetBin>,
}

/// Platform target of an asset: one target string or a set of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Single(String),
    Many(BTreeSet<String>),
}

impl Target {
    pub fn matches(&self, target: &str) -> bool {
        match self {
            Target::Single(t) => t == target,
            Target::Many(set) => set.contains(target),
        }
    }
}

/// Binary path(s) inside an asset: a single path, or one path per exposed name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetBin {
    Single(String),
    Named(BTreeMap<String, String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIPGREP: &str = r#"{
        "name": "ripgrep",
        "version": "14.1.0",
        "description": "recursively searches directories",
        "homepage": "https://github.com/BurntSushi/ripgrep",
        "licenses": ["MIT"],
        "languages": [],
        "categories": ["Search"],
        "source": {
            "id": "pkg:github/BurntSushi/ripgrep",
            "asset": [
                {
                    "target": ["linux_x64", "linux_x64_gnu"],
                    "file": "ripgrep-{{version}}-x86_64-unknown-linux-musl.tar.gz",
                    "bin": "ripgrep-{{version}}-x86_64-unknown-linux-musl/rg"
                },
                {
                    "target": "darwin_arm64",
                    "file": "ripgrep-{{version}}-aarch64-apple-darwin.tar.gz",
                    "bin": { "rg": "ripgrep-{{version}}-aarch64-apple-darwin/rg" }
                }
            ]
        },
        "bin": { "rg": "{{source.asset.bin}}" }
    }"#;

    #[test]
    fn test_deserialize_entry_with_variant_fields() {
        let entry: RegistryEntry = serde_json::from_str(RIPGREP).unwrap();
        assert_eq!(entry.name, "ripgrep");
        assert!(entry.has_assets());

        let linux = &entry.source.assets[0];
        assert!(matches!(linux.target, Target::Many(_)));
        assert!(linux.target.matches("linux_x64_gnu"));
        assert!(matches!(linux.bin, Some(AssetBin::Single(_))));

        let mac = &entry.source.assets[1];
        assert_eq!(mac.target, Target::Single("darwin_arm64".into()));
        assert!(matches!(mac.bin, Some(AssetBin::Named(ref m)) if m.contains_key("rg")));
    }

    #[test]
    fn test_deserialize_minimal_entry() {
        let entry: RegistryEntry =
            serde_json::from_str(r#"{"name":"tsserver","source":{"id":"npm:typescript"}}"#)
                .unwrap();
        assert_eq!(entry.version, "");
        assert!(!entry.has_assets());
        assert!(entry.bin.is_empty());
    }
}

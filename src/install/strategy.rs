//! Strategy selection and the stage machine every install walks through.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InstallError;
use crate::provider::ProviderKind;
use crate::registry::RegistryEntry;

/// The three install mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ReleaseAsset,
    Git,
    Native,
}

impl StrategyKind {
    /// Whether the provider's own tool must be present before anything is
    /// touched.
    pub fn requires_tool(&self) -> bool {
        !matches!(self, StrategyKind::ReleaseAsset)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::ReleaseAsset => "release asset",
            StrategyKind::Git => "git",
            StrategyKind::Native => "native",
        })
    }
}

/// Declared assets win, then git hosts, then the ecosystem's own manager.
pub fn select_strategy(entry: Option<&RegistryEntry>, provider: ProviderKind) -> StrategyKind {
    if entry.is_some_and(RegistryEntry::has_assets) {
        StrategyKind::ReleaseAsset
    } else if provider.is_git_host() {
        StrategyKind::Git
    } else {
        StrategyKind::Native
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    VersionResolving,
    Fetching,
    Placing,
    Exposing,
    Recorded,
    Failed,
}

impl Stage {
    /// The stage that follows a completed one. Terminal stages stay put.
    pub fn next(self) -> Stage {
        match self {
            Stage::Idle => Stage::VersionResolving,
            Stage::VersionResolving => Stage::Fetching,
            Stage::Fetching => Stage::Placing,
            Stage::Placing => Stage::Exposing,
            Stage::Exposing => Stage::Recorded,
            Stage::Recorded => Stage::Recorded,
            Stage::Failed => Stage::Failed,
        }
    }
}

/// Non-failing result of a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed,
    /// The stage did its job but something optional went wrong.
    Degraded(Vec<String>),
}

impl StageOutcome {
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            StageOutcome::Completed
        } else {
            StageOutcome::Degraded(warnings)
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            StageOutcome::Completed => &[],
            StageOutcome::Degraded(warnings) => warnings,
        }
    }
}

/// Tracks one package through the stages.
///
/// Stages must be entered in order; an `Err` from any stage moves the
/// pipeline to [`Stage::Failed`] and is handed back to the caller.
#[derive(Debug)]
pub struct Pipeline {
    package: String,
    stage: Stage,
    warnings: Vec<String>,
}

impl Pipeline {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            stage: Stage::Idle,
            warnings: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }

    /// Advance past a stage whose only output is a value.
    pub fn step<T>(&mut self, result: Result<T, InstallError>) -> Result<T, InstallError> {
        match result {
            Ok(value) => {
                self.advance(Ok(StageOutcome::Completed))?;
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Advance to the next stage and fold in its result.
    pub fn advance(
        &mut self,
        result: Result<StageOutcome, InstallError>,
    ) -> Result<(), InstallError> {
        let stage = self.stage.next();
        match result {
            Ok(outcome) => {
                debug!("{}: {:?} done", self.package, stage);
                self.warnings.extend(outcome.warnings().iter().cloned());
                self.stage = stage;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: InstallError) -> InstallError {
        debug!("{}: {:?} failed: {}", self.package, self.stage.next(), error);
        self.stage = Stage::Failed;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AssetDescriptor, RegistrySource, Target};
    use std::collections::BTreeMap;

    fn entry(with_assets: bool) -> RegistryEntry {
        let assets = if with_assets {
            vec![AssetDescriptor {
                target: Target::Single("linux_x64".into()),
                file: "tool.tar.gz".into(),
                bin: None,
            }]
        } else {
            Vec::new()
        };
        RegistryEntry {
            name: "tool".into(),
            version: String::new(),
            description: None,
            homepage: None,
            licenses: vec![],
            languages: vec![],
            categories: vec![],
            source: RegistrySource {
                id: "github:o/tool".into(),
                assets,
            },
            bin: BTreeMap::new(),
        }
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(
            select_strategy(Some(&entry(true)), ProviderKind::GitHub),
            StrategyKind::ReleaseAsset
        );
        assert_eq!(
            select_strategy(Some(&entry(true)), ProviderKind::Npm),
            StrategyKind::ReleaseAsset
        );
        assert_eq!(
            select_strategy(Some(&entry(false)), ProviderKind::GitLab),
            StrategyKind::Git
        );
        assert_eq!(select_strategy(None, ProviderKind::Codeberg), StrategyKind::Git);
        assert_eq!(select_strategy(None, ProviderKind::Cargo), StrategyKind::Native);
        assert_eq!(
            select_strategy(Some(&entry(false)), ProviderKind::Generic),
            StrategyKind::Native
        );
    }

    #[test]
    fn test_pipeline_walks_stages_in_order() {
        let mut pipeline = Pipeline::new("cargo:ripgrep");
        assert_eq!(pipeline.stage(), Stage::Idle);

        pipeline.advance(Ok(StageOutcome::Completed)).unwrap();
        assert_eq!(pipeline.stage(), Stage::VersionResolving);
        pipeline.advance(Ok(StageOutcome::Completed)).unwrap();
        pipeline.advance(Ok(StageOutcome::Completed)).unwrap();
        pipeline
            .advance(Ok(StageOutcome::Degraded(vec!["no link".into()])))
            .unwrap();
        assert_eq!(pipeline.stage(), Stage::Exposing);
        pipeline.advance(Ok(StageOutcome::Completed)).unwrap();
        assert_eq!(pipeline.stage(), Stage::Recorded);
        assert_eq!(pipeline.warnings(), ["no link".to_string()]);
    }

    #[test]
    fn test_pipeline_failure_is_terminal() {
        let mut pipeline = Pipeline::new("github:o/r");
        pipeline.advance(Ok(StageOutcome::Completed)).unwrap();

        let err = pipeline
            .advance(Err(InstallError::FetchFailed {
                package: "github:o/r".into(),
                reason: "404".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, InstallError::FetchFailed { .. }));
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert_eq!(pipeline.stage().next(), Stage::Failed);
    }

    #[test]
    fn test_only_release_assets_skip_the_tool_check() {
        assert!(!StrategyKind::ReleaseAsset.requires_tool());
        assert!(StrategyKind::Git.requires_tool());
        assert!(StrategyKind::Native.requires_tool());
    }
}

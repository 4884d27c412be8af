//! Language package managers: cargo, npm, pip, go and gem.
//!
//! One adapter serves all five; each method picks the command line and the
//! output parser for the ecosystem. When a tool prints several candidate
//! lines, the first line naming exactly the requested package wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use glob::Pattern;
use log::debug;
use serde::Deserialize;

use super::executor::{CommandSpec, Executor, run_checked};
use super::Backend;
use crate::provider::ProviderKind;
use crate::source::PackageRef;

/// Files in a virtualenv's bin dir that belong to the interpreter, not the package.
const VENV_INTERNALS: [&str; 5] = ["python*", "pip*", "activate*", "Activate*", "deactivate*"];

pub struct NativeBackend {
    kind: ProviderKind,
    executor: Arc<dyn Executor>,
}

impl NativeBackend {
    /// `kind` must be a native provider.
    pub fn new(kind: ProviderKind, executor: Arc<dyn Executor>) -> Self {
        debug_assert!(kind.is_native());
        Self { kind, executor }
    }

    fn tool(&self) -> &'static str {
        match self.kind {
            ProviderKind::Cargo => "cargo",
            ProviderKind::Npm => "npm",
            ProviderKind::Pypi => "python3",
            ProviderKind::Golang => "go",
            _ => "gem",
        }
    }

    fn probe(&self) -> CommandSpec {
        match self.kind {
            ProviderKind::Golang => CommandSpec::new("go").arg("version"),
            _ => CommandSpec::new(self.tool()).arg("--version"),
        }
    }

    async fn stdout(&self, command: CommandSpec) -> Result<String> {
        run_checked(self.executor.as_ref(), &command).await
    }
}

fn venv_dir(install_dir: &Path) -> PathBuf {
    install_dir.join("venv")
}

fn venv_bin(install_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir(install_dir).join("Scripts")
    } else {
        venv_dir(install_dir).join("bin")
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl Backend for NativeBackend {
    fn provider(&self) -> ProviderKind {
        self.kind
    }

    fn required_tool(&self) -> Option<String> {
        Some(self.tool().to_string())
    }

    async fn is_available(&self) -> bool {
        self.executor.has_command(&self.probe()).await
    }

    #[tracing::instrument(skip(self), fields(provider = %self.kind))]
    async fn resolve_latest(&self, package: &PackageRef) -> Result<String> {
        let id = package.package_id();
        let version = match self.kind {
            ProviderKind::Cargo => {
                let out = self
                    .stdout(CommandSpec::new("cargo").args(["search", id, "--limit", "1"]))
                    .await?;
                parse_cargo_search(&out, id)
            }
            ProviderKind::Npm => {
                let out = self
                    .stdout(CommandSpec::new("npm").args(["view", id, "version"]))
                    .await?;
                parse_last_line(&out)
            }
            ProviderKind::Pypi => {
                let out = self
                    .stdout(CommandSpec::new("python3").args(["-m", "pip", "index", "versions", id]))
                    .await?;
                parse_pip_index(&out, id)
            }
            ProviderKind::Golang => {
                let out = self
                    .stdout(
                        CommandSpec::new("go").args(["list", "-m", "-json", &format!("{}@latest", id)]),
                    )
                    .await?;
                parse_go_list(&out)?
            }
            _ => {
                let out = self
                    .stdout(CommandSpec::new("gem").args(["list", id, "--remote", "--exact"]))
                    .await?;
                parse_gem_list(&out, id)
            }
        };

        let version = version.ok_or_else(|| anyhow!("{} reported no version for {}", self.tool(), id))?;
        debug!("Latest version of {} is {}", package, version);
        Ok(version)
    }

    #[tracing::instrument(skip(self), fields(provider = %self.kind))]
    async fn install(&self, package: &PackageRef, version: &str, install_dir: &Path) -> Result<()> {
        let id = package.package_id();
        let dir = path_string(install_dir);

        match self.kind {
            ProviderKind::Cargo => {
                let mut command = CommandSpec::new("cargo").args(["install", id, "--root", &dir]);
                if !version.is_empty() {
                    command = command.args(["--version", version]);
                }
                self.stdout(command).await?;
            }
            ProviderKind::Npm => {
                let spec = if version.is_empty() {
                    id.to_string()
                } else {
                    format!("{}@{}", id, version)
                };
                self.stdout(CommandSpec::new("npm").args(["install", "--prefix", &dir, &spec]))
                    .await?;
            }
            ProviderKind::Pypi => {
                self.stdout(
                    CommandSpec::new("python3")
                        .args(["-m", "venv"])
                        .path_arg(&venv_dir(install_dir)),
                )
                .await
                .context("Failed to create virtualenv")?;
                let python = venv_bin(install_dir).join(if cfg!(windows) {
                    "python.exe"
                } else {
                    "python"
                });
                let spec = if version.is_empty() {
                    id.to_string()
                } else {
                    format!("{}=={}", id, version)
                };
                self.stdout(
                    CommandSpec::new(path_string(&python)).args(["-m", "pip", "install", "--upgrade", &spec]),
                )
                .await?;
            }
            ProviderKind::Golang => {
                let target = if version.is_empty() { "latest" } else { version };
                self.stdout(
                    CommandSpec::new("go")
                        .args(["install", &format!("{}@{}", id, target)])
                        .env("GOBIN", path_string(&install_dir.join("bin"))),
                )
                .await?;
            }
            _ => {
                let bin = path_string(&install_dir.join("bin"));
                let mut command = CommandSpec::new("gem").args([
                    "install",
                    id,
                    "--install-dir",
                    &dir,
                    "--bindir",
                    &bin,
                    "--no-document",
                ]);
                if !version.is_empty() {
                    command = command.args(["--version", version]);
                }
                self.stdout(command).await?;
            }
        }
        Ok(())
    }

    async fn installed_version(
        &self,
        package: &PackageRef,
        install_dir: &Path,
    ) -> Result<Option<String>> {
        let id = package.package_id();
        let dir = path_string(install_dir);

        match self.kind {
            ProviderKind::Cargo => {
                let out = self
                    .stdout(CommandSpec::new("cargo").args(["install", "--list", "--root", &dir]))
                    .await?;
                Ok(parse_cargo_install_list(&out, id))
            }
            ProviderKind::Npm => {
                let out = self
                    .stdout(CommandSpec::new("npm").args([
                        "ls",
                        "--prefix",
                        &dir,
                        "--json",
                        "--depth=0",
                    ]))
                    .await?;
                parse_npm_ls(&out, id)
            }
            ProviderKind::Gem => {
                let out = self
                    .stdout(
                        CommandSpec::new("gem")
                            .args(["list", id, "--local", "--exact"])
                            .env("GEM_HOME", dir.clone()),
                    )
                    .await?;
                Ok(parse_gem_list(&out, id))
            }
            // pip and go keep no queryable per-directory state
            _ => Ok(None),
        }
    }

    fn bin_dir(&self, install_dir: &Path) -> PathBuf {
        match self.kind {
            ProviderKind::Npm => install_dir.join("node_modules").join(".bin"),
            ProviderKind::Pypi => venv_bin(install_dir),
            _ => install_dir.join("bin"),
        }
    }

    fn runtime_env(&self, install_dir: &Path) -> Vec<(String, String)> {
        let dir = path_string(install_dir);
        match self.kind {
            ProviderKind::Pypi => vec![
                ("VIRTUAL_ENV".to_string(), path_string(&venv_dir(install_dir))),
                (
                    "PATH".to_string(),
                    format!("{}:$PATH", path_string(&venv_bin(install_dir))),
                ),
            ],
            ProviderKind::Gem => vec![
                ("GEM_HOME".to_string(), dir.clone()),
                ("GEM_PATH".to_string(), dir),
            ],
            _ => Vec::new(),
        }
    }

    fn should_expose(&self, file_name: &str) -> bool {
        if self.kind != ProviderKind::Pypi {
            return true;
        }
        !VENV_INTERNALS
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches(file_name))
    }
}

/// `ripgrep = "14.1.0"    # Line-oriented search tool`
fn parse_cargo_search(output: &str, id: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix(id)?.trim_start().strip_prefix('=')?;
        let rest = rest.trim_start().strip_prefix('"')?;
        let end = rest.find('"')?;
        Some(rest[..end].to_string())
    })
}

/// `ripgrep v14.1.0:`
fn parse_cargo_install_list(output: &str, id: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix(id)?.strip_prefix(' ')?;
        let version = rest.split_whitespace().next()?.trim_end_matches(':');
        Some(version.strip_prefix('v').unwrap_or(version).to_string())
    })
}

fn parse_last_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(|line| line.trim_matches(|c| c == '\'' || c == '"').to_string())
}

/// `black (24.1.1)`
fn parse_pip_index(output: &str, id: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (name, rest) = line.split_once('(')?;
        if !name.trim().eq_ignore_ascii_case(id) {
            return None;
        }
        let version = rest.split(')').next()?.trim();
        (!version.is_empty()).then(|| version.to_string())
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GoModule {
    version: Option<String>,
}

fn parse_go_list(output: &str) -> Result<Option<String>> {
    let module: GoModule =
        serde_json::from_str(output).context("Failed to parse `go list -m -json` output")?;
    Ok(module.version.filter(|v| !v.is_empty()))
}

/// `rubocop (1.60.2, 1.59.0)` or `nokogiri (1.16.0 x86_64-linux)`
fn parse_gem_list(output: &str, id: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (name, rest) = line.split_once('(')?;
        if name.trim() != id {
            return None;
        }
        let first = rest.split([',', ')']).next()?;
        let version = first.split_whitespace().find(|t| *t != "default:")?;
        Some(version.to_string())
    })
}

#[derive(Deserialize)]
struct NpmLs {
    #[serde(default)]
    dependencies: std::collections::HashMap<String, NpmDependency>,
}

#[derive(Deserialize)]
struct NpmDependency {
    version: Option<String>,
}

fn parse_npm_ls(output: &str, id: &str) -> Result<Option<String>> {
    if output.trim().is_empty() {
        return Ok(None);
    }
    let ls: NpmLs = serde_json::from_str(output).context("Failed to parse `npm ls` output")?;
    Ok(ls.dependencies.get(id).and_then(|d| d.version.clone()))
}

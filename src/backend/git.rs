//! Git hosts: github, gitlab and codeberg.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, info};

use super::Backend;
use super::executor::{CommandSpec, Executor, run_checked};
use crate::provider::ProviderKind;
use crate::source::PackageRef;

/// Branch names tried, in order, when the remote HEAD is unknown.
const CONVENTIONAL_BRANCHES: [&str; 4] = ["main", "master", "trunk", "develop"];

/// HTTPS clone URL of a repository on a git host.
pub fn repository_url(kind: ProviderKind, package_id: &str) -> Option<String> {
    let host = match kind {
        ProviderKind::GitHub => "github.com",
        ProviderKind::GitLab => "gitlab.com",
        ProviderKind::Codeberg => "codeberg.org",
        _ => return None,
    };
    Some(format!("https://{}/{}.git", host, package_id))
}

/// Thin wrapper over the `git` command line.
pub struct GitClient {
    executor: Arc<dyn Executor>,
}

impl GitClient {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    fn git(dir: &Path) -> CommandSpec {
        CommandSpec::new("git").arg("-C").path_arg(dir)
    }

    pub async fn is_available(&self) -> bool {
        self.executor
            .has_command(&CommandSpec::new("git").arg("--version"))
            .await
    }

    /// Whether `dir` itself is a clone. Repositories above `dir` do not count.
    pub async fn is_repository(&self, dir: &Path) -> bool {
        let mut command = Self::git(dir).args(["rev-parse", "--git-dir"]);
        if let Some(parent) = dir.parent() {
            command = command.env("GIT_CEILING_DIRECTORIES", parent.to_string_lossy());
        }
        matches!(self.executor.run(&command).await, Ok(0))
    }

    /// Clone `url` into `dir`, or fetch into an existing clone.
    #[tracing::instrument(skip(self))]
    pub async fn clone_or_fetch(&self, url: &str, dir: &Path) -> Result<()> {
        if self.is_repository(dir).await {
            debug!("Fetching updates into {:?}", dir);
            run_checked(
                self.executor.as_ref(),
                &Self::git(dir).args(["fetch", "--tags", "--force", "--prune", "origin"]),
            )
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        } else {
            info!("Cloning {}...", url);
            run_checked(
                self.executor.as_ref(),
                &CommandSpec::new("git").args(["clone", url]).path_arg(dir),
            )
            .await
            .with_context(|| format!("Failed to clone {}", url))?;
        }
        Ok(())
    }

    /// Newest tag in the clone by version order, if any. Every fetched tag
    /// counts, not only those reachable from the checked-out HEAD.
    pub async fn latest_tag(&self, dir: &Path) -> Result<Option<String>> {
        let out = run_checked(self.executor.as_ref(), &Self::git(dir).args(["tag", "--list"]))
            .await
            .with_context(|| format!("Failed to list tags in {:?}", dir))?;
        let tags: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(pick_latest_tag(&tags))
    }

    /// Tag HEAD sits on exactly, if any.
    pub async fn exact_tag(&self, dir: &Path) -> Result<Option<String>> {
        let output = self
            .executor
            .run_capture(&Self::git(dir).args(["describe", "--tags", "--exact-match"]))
            .await?;
        Ok(output
            .success()
            .then(|| output.stdout.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// The remote's default branch: `origin/HEAD` when set, otherwise the
    /// first conventional branch name the remote has.
    pub async fn default_branch(&self, dir: &Path) -> Result<String> {
        let output = self
            .executor
            .run_capture(&Self::git(dir).args([
                "symbolic-ref",
                "--short",
                "refs/remotes/origin/HEAD",
            ]))
            .await?;
        if output.success() {
            let head = output.stdout.trim();
            if let Some(branch) = head.strip_prefix("origin/").filter(|b| !b.is_empty()) {
                return Ok(branch.to_string());
            }
        }

        for branch in CONVENTIONAL_BRANCHES {
            if self.has_remote_branch(dir, branch).await {
                return Ok(branch.to_string());
            }
        }
        Err(anyhow!("Cannot determine the default branch of {:?}", dir))
    }

    async fn has_remote_branch(&self, dir: &Path, branch: &str) -> bool {
        matches!(
            self.executor
                .run(&Self::git(dir).args([
                    "rev-parse",
                    "--verify",
                    "--quiet",
                    &format!("refs/remotes/origin/{}", branch),
                ]))
                .await,
            Ok(0)
        )
    }

    /// Check out `reference` (tag, branch or commit) as a detached HEAD.
    /// Branch names resolve to the fetched remote branch.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        let target = if self.has_remote_branch(dir, reference).await {
            format!("origin/{}", reference)
        } else {
            reference.to_string()
        };
        run_checked(
            self.executor.as_ref(),
            &Self::git(dir).args(["checkout", "--force", "--detach", &target]),
        )
        .await
        .with_context(|| format!("Failed to check out {}", reference))?;
        Ok(())
    }

    /// Tag names published by the remote.
    pub async fn remote_tags(&self, url: &str) -> Result<Vec<String>> {
        let out = run_checked(
            self.executor.as_ref(),
            &CommandSpec::new("git").args(["ls-remote", "--tags", "--refs", url]),
        )
        .await
        .with_context(|| format!("Failed to list tags of {}", url))?;
        Ok(parse_ls_remote_tags(&out))
    }
}

fn parse_ls_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|reference| reference.strip_prefix("refs/tags/"))
        .map(str::to_string)
        .collect()
}

/// Highest tag by semantic version (a leading `v` is ignored). Falls back to
/// the lexically greatest tag when none parse.
pub fn pick_latest_tag(tags: &[String]) -> Option<String> {
    let by_semver = tags
        .iter()
        .filter_map(|tag| {
            let bare = tag.strip_prefix('v').unwrap_or(tag);
            semver::Version::parse(bare).ok().map(|v| (v, tag))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, tag)| tag.clone());

    by_semver.or_else(|| tags.iter().max().cloned())
}

/// Backend for repositories on a git host.
pub struct GitBackend {
    kind: ProviderKind,
    client: GitClient,
}

impl GitBackend {
    /// `kind` must be a git host.
    pub fn new(kind: ProviderKind, client: GitClient) -> Self {
        debug_assert!(kind.is_git_host());
        Self { kind, client }
    }

    pub fn client(&self) -> &GitClient {
        &self.client
    }

    fn url(&self, package: &PackageRef) -> Result<String> {
        repository_url(self.kind, package.package_id())
            .ok_or_else(|| anyhow!("{} is not hosted on a git forge", package))
    }
}

#[async_trait]
impl Backend for GitBackend {
    fn provider(&self) -> ProviderKind {
        self.kind
    }

    fn required_tool(&self) -> Option<String> {
        Some("git".to_string())
    }

    async fn is_available(&self) -> bool {
        self.client.is_available().await
    }

    async fn resolve_latest(&self, package: &PackageRef) -> Result<String> {
        let url = self.url(package)?;
        let tags = self.client.remote_tags(&url).await?;
        pick_latest_tag(&tags).ok_or_else(|| anyhow!("{} has no tags", url))
    }

    /// Clone when needed and check out `version`. Fetching updates is the
    /// caller's job.
    async fn install(&self, package: &PackageRef, version: &str, install_dir: &Path) -> Result<()> {
        if !self.client.is_repository(install_dir).await {
            let url = self.url(package)?;
            self.client.clone_or_fetch(&url, install_dir).await?;
        }
        if !version.is_empty() {
            self.client.checkout(install_dir, version).await?;
        }
        Ok(())
    }

    async fn installed_version(
        &self,
        _package: &PackageRef,
        install_dir: &Path,
    ) -> Result<Option<String>> {
        if !self.client.is_repository(install_dir).await {
            return Ok(None);
        }
        self.client.exact_tag(install_dir).await
    }

    fn bin_dir(&self, install_dir: &Path) -> PathBuf {
        install_dir.to_path_buf()
    }

    fn runtime_env(&self, _install_dir: &Path) -> Vec<(String, String)> {
        Vec::new()
    }

    fn should_expose(&self, file_name: &str) -> bool {
        !file_name.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CapturedOutput;
    use crate::backend::executor::{MockExecutor, SystemExecutor};

    fn captured(status: i32, stdout: &str) -> Result<CapturedOutput> {
        Ok(CapturedOutput {
            status,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn args_contain(command: &CommandSpec, needle: &str) -> bool {
        command.get_args().iter().any(|a| a == needle)
    }

    #[test]
    fn test_repository_url() {
        assert_eq!(
            repository_url(ProviderKind::GitHub, "BurntSushi/ripgrep").as_deref(),
            Some("https://github.com/BurntSushi/ripgrep.git")
        );
        assert_eq!(
            repository_url(ProviderKind::GitLab, "group/sub/repo").as_deref(),
            Some("https://gitlab.com/group/sub/repo.git")
        );
        assert_eq!(
            repository_url(ProviderKind::Codeberg, "o/r").as_deref(),
            Some("https://codeberg.org/o/r.git")
        );
        assert_eq!(repository_url(ProviderKind::Cargo, "ripgrep"), None);
    }

    #[test]
    fn test_pick_latest_tag_semver() {
        let tags: Vec<String> = ["v1.9.0", "v1.10.0", "v1.2.3", "nightly"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(pick_latest_tag(&tags).as_deref(), Some("v1.10.0"));
    }

    #[test]
    fn test_pick_latest_tag_lexical_fallback() {
        let tags: Vec<String> = vec!["2023-12-09".into(), "2024-01-15".into()];
        assert_eq!(pick_latest_tag(&tags).as_deref(), Some("2024-01-15"));
        assert_eq!(pick_latest_tag(&[]), None);
    }

    #[test]
    fn test_parse_ls_remote_tags() {
        let out = "a1b2\trefs/tags/v1.0.0\nc3d4\trefs/tags/v1.1.0\n";
        assert_eq!(parse_ls_remote_tags(out), vec!["v1.0.0", "v1.1.0"]);
    }

    #[tokio::test]
    async fn test_default_branch_prefers_origin_head() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "symbolic-ref"))
            .returning(|_| captured(0, "origin/trunk\n"));

        let client = GitClient::new(Arc::new(executor));
        assert_eq!(client.default_branch(Path::new("/r")).await.unwrap(), "trunk");
    }

    #[tokio::test]
    async fn test_default_branch_falls_back_to_conventional_names() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "symbolic-ref"))
            .returning(|_| captured(128, ""));
        executor
            .expect_run()
            .withf(|c| args_contain(c, "refs/remotes/origin/main"))
            .returning(|_| Ok(1));
        executor
            .expect_run()
            .withf(|c| args_contain(c, "refs/remotes/origin/master"))
            .returning(|_| Ok(0));

        let client = GitClient::new(Arc::new(executor));
        assert_eq!(client.default_branch(Path::new("/r")).await.unwrap(), "master");
    }

    #[tokio::test]
    async fn test_latest_tag_none_without_tags() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "tag") && args_contain(c, "--list"))
            .returning(|_| captured(0, ""));

        let client = GitClient::new(Arc::new(executor));
        assert_eq!(client.latest_tag(Path::new("/r")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clone_when_not_a_repository() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .withf(|c| args_contain(c, "--git-dir"))
            .returning(|_| Ok(128));
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "clone"))
            .times(1)
            .returning(|_| captured(0, ""));

        let client = GitClient::new(Arc::new(executor));
        client
            .clone_or_fetch("https://github.com/o/r.git", Path::new("/root/github/o/r"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_when_already_cloned() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .withf(|c| args_contain(c, "--git-dir"))
            .returning(|_| Ok(0));
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "fetch"))
            .times(1)
            .returning(|_| captured(0, ""));

        let client = GitClient::new(Arc::new(executor));
        client
            .clone_or_fetch("https://github.com/o/r.git", Path::new("/root/github/o/r"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkout_branch_uses_remote_ref() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .withf(|c| args_contain(c, "refs/remotes/origin/main"))
            .returning(|_| Ok(0));
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "checkout") && args_contain(c, "origin/main"))
            .times(1)
            .returning(|_| captured(0, ""));

        let client = GitClient::new(Arc::new(executor));
        client.checkout(Path::new("/r"), "main").await.unwrap();
    }

    #[tokio::test]
    async fn test_backend_resolve_latest_uses_remote_tags() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run_capture()
            .withf(|c| args_contain(c, "ls-remote") && args_contain(c, "https://github.com/o/r.git"))
            .returning(|_| captured(0, "x\trefs/tags/v0.9.0\ny\trefs/tags/v0.10.1\n"));

        let backend = GitBackend::new(ProviderKind::GitHub, GitClient::new(Arc::new(executor)));
        let package = PackageRef::parse("github:o/r").unwrap();
        assert_eq!(backend.resolve_latest(&package).await.unwrap(), "v0.10.1");
        assert!(!backend.should_expose(".hidden"));
        assert!(backend.should_expose("tool"));
    }

    fn git_in(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=provi", "-c", "user.email=provi@example.com"])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn commit_and_tag(origin: &Path, tag: &str) {
        std::fs::write(origin.join("VERSION"), tag).unwrap();
        git_in(origin, &["add", "VERSION"]);
        git_in(origin, &["commit", "-q", "-m", tag]);
        git_in(origin, &["tag", tag]);
    }

    #[tokio::test]
    async fn test_latest_tag_after_fetch_ignores_checked_out_tag() {
        let client = GitClient::new(Arc::new(SystemExecutor));
        if !client.is_available().await {
            return;
        }

        // --- Origin at v1.0.0, cloned and checked out ---
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git_in(&origin, &["init", "-q"]);
        commit_and_tag(&origin, "v1.0.0");
        let url = origin.to_string_lossy().into_owned();
        let clone = dir.path().join("clone");
        client.clone_or_fetch(&url, &clone).await.unwrap();
        client.checkout(&clone, "v1.0.0").await.unwrap();
        assert_eq!(client.latest_tag(&clone).await.unwrap().as_deref(), Some("v1.0.0"));

        // --- Upstream releases v2.0.0 ---
        commit_and_tag(&origin, "v2.0.0");
        client.clone_or_fetch(&url, &clone).await.unwrap();

        assert_eq!(client.latest_tag(&clone).await.unwrap().as_deref(), Some("v2.0.0"));
        assert_eq!(client.exact_tag(&clone).await.unwrap().as_deref(), Some("v1.0.0"));
    }
}

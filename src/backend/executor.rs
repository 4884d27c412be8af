//! Subprocess execution for ecosystem tools.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

/// A command line plus its working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status and decoded output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion, discarding output. Returns the exit code.
    async fn run(&self, command: &CommandSpec) -> Result<i32>;

    /// Run to completion and capture stdout and stderr.
    async fn run_capture(&self, command: &CommandSpec) -> Result<CapturedOutput>;

    /// Whether the probe command can be spawned and exits successfully.
    async fn has_command(&self, probe: &CommandSpec) -> bool;
}

/// Run `command` and return its stdout, failing on a non-zero exit with the
/// command's stderr in the error.
pub async fn run_checked<E: Executor + ?Sized>(executor: &E, command: &CommandSpec) -> Result<String> {
    let output = executor.run_capture(command).await?;
    if !output.success() {
        bail!(
            "`{}` exited with status {}: {}",
            command,
            output.status,
            output.stderr.trim()
        );
    }
    Ok(output.stdout)
}

/// Executes commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl Executor for SystemExecutor {
    #[tracing::instrument(skip(self, command), fields(command = %command))]
    async fn run(&self, command: &CommandSpec) -> Result<i32> {
        debug!("Running {}", command);
        let status = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run {}", command.program()))?;
        Ok(status.code().unwrap_or(-1))
    }

    #[tracing::instrument(skip(self, command), fields(command = %command))]
    async fn run_capture(&self, command: &CommandSpec) -> Result<CapturedOutput> {
        debug!("Running {}", command);
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", command.program()))?;

        Ok(CapturedOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn has_command(&self, probe: &CommandSpec) -> bool {
        let found = self.run(probe).await.map(|code| code == 0).unwrap_or(false);
        debug!("Probe `{}`: {}", probe, if found { "found" } else { "missing" });
        found
    }
}

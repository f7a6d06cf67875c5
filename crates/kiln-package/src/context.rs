//! Build context and the external-process capability
//!
//! Every lifecycle hook receives an explicit `BuildContext` instead of
//! reading ambient "current package" state, and every external tool is
//! invoked through the `Executor` trait as a command vector with a
//! structured environment and a timeout. The orchestration core never
//! assumes a specific native toolchain, only this capability.

use crate::identity::PackageIdentity;
use crate::options::BuildOptions;
use crate::settings::Settings;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default per-invocation timeout when the caller supplies none.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(900);

/// One external tool invocation: a command vector, never an interpolated
/// shell string.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The invocation rendered for diagnostics only; it is never handed to
    /// a shell.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            let _ = write!(line, " {}", arg);
        }
        line
    }
}

/// Captured result of a completed external invocation
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout/stderr for failure reports
    pub fn combined(&self) -> String {
        let mut output = String::new();
        if !self.stdout.is_empty() {
            output.push_str("STDOUT:\n");
            output.push_str(&self.stdout);
            output.push('\n');
        }
        if !self.stderr.is_empty() {
            output.push_str("STDERR:\n");
            output.push_str(&self.stderr);
        }
        output
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("tool '{0}' not found")]
    MissingTool(String),

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run '{command}': {error}")]
    Io {
        command: String,
        #[source]
        error: std::io::Error,
    },
}

/// The abstract "run an external build tool" capability.
pub trait Executor: Send + Sync {
    fn run(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError>;
}

/// Everything a lifecycle hook may rely on: the job's directories, the
/// computed identity, the assembled environment and the executor handle.
pub struct BuildContext<'a> {
    pub identity: PackageIdentity,
    /// Isolated per-identity scratch directory the stages run in
    pub work_dir: PathBuf,
    /// Declared package install target (`--prefix` in autotools terms)
    pub install_dir: PathBuf,
    pub options: BuildOptions,
    pub settings: Settings,
    /// Stage environment, including consumption metadata of already-built
    /// dependencies
    pub env: HashMap<String, String>,
    /// Parallelism hint for build drivers (`make -j`)
    pub jobs: usize,
    pub verbose: bool,
    pub stage_timeout: Duration,
    executor: &'a dyn Executor,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        identity: PackageIdentity,
        work_dir: PathBuf,
        install_dir: PathBuf,
        options: BuildOptions,
        settings: Settings,
        executor: &'a dyn Executor,
    ) -> Self {
        Self {
            identity,
            work_dir,
            install_dir,
            options,
            settings,
            env: HashMap::new(),
            jobs: 1,
            verbose: false,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            executor,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor
    }

    /// Run a tool in the job's working directory with the assembled
    /// environment and the context timeout.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput, ExecError> {
        self.run_in(&self.work_dir, program, args)
    }

    /// Same as [`run`](Self::run) with an explicit working directory.
    pub fn run_in(&self, cwd: &Path, program: &str, args: &[&str]) -> Result<ExecOutput, ExecError> {
        let request = ExecRequest::new(program, cwd)
            .with_args(args.iter().copied())
            .with_env(self.env.clone())
            .with_timeout(self.stage_timeout);

        if self.verbose {
            println!("  [{}] {}", self.identity.reference(), request.command_line());
        }

        self.executor.run(&request)
    }
}

//! Build coordinator: walks a dependency graph and materializes every
//! artifact it names
//!
//! Scheduling is dependency-driven rather than a fixed topological walk:
//! a worker pool picks up any package whose dependencies are all
//! committed, so independent subtrees build in parallel. The artifact
//! store's claim protocol keeps concurrent coordinators from building the
//! same identity twice.

use crate::error::{BuildFailed, JobRecord, JobStatus, MaterializeReport, SkippedJob};
use crate::metadata::{self, Artifact};
use crate::store::{ArtifactStore, Claim, StoreError};
use kiln_package::context::{BuildContext, DEFAULT_STAGE_TIMEOUT, ExecRequest, Executor};
use kiln_package::graph::{DependencyGraph, GraphNode};
use kiln_package::identity::PackageIdentity;
use kiln_package::recipe::{LifecycleCause, LifecycleError, LifecycleStage};
use kiln_package::settings::Settings;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker threads pulling jobs off the graph
    pub workers: usize,
    /// Parallelism hint handed to each recipe (`make -j`)
    pub jobs: usize,
    pub skip_tests: bool,
    pub verbose: bool,
    pub stage_timeout: Duration,
    /// Attempt to install declared bootstrap tools before building
    pub install_tools: bool,
    /// Command prefix the tool names are appended to
    pub tool_installer: Vec<String>,
    /// Scratch area for per-package work directories. Defaults to a
    /// `.work` directory inside the store.
    pub work_root: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: parallelism,
            jobs: parallelism,
            skip_tests: false,
            verbose: false,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            install_tools: false,
            tool_installer: vec![
                "apt-get".to_string(),
                "install".to_string(),
                "-y".to_string(),
            ],
            work_root: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_skip_tests(mut self, skip_tests: bool) -> Self {
        self.skip_tests = skip_tests;
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

    pub fn with_install_tools(mut self, install_tools: bool) -> Self {
        self.install_tools = install_tools;
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(work_root.into());
        self
    }
}

/// Per-job outcome handed back to the scheduler
enum JobOutcome {
    Built(Artifact),
    Cached(Artifact),
    Failed(BuildFailed),
}

pub struct Coordinator {
    store: ArtifactStore,
    executor: Box<dyn Executor>,
    settings: Settings,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(store: ArtifactStore, executor: Box<dyn Executor>, settings: Settings) -> Self {
        Self::with_config(store, executor, settings, CoordinatorConfig::default())
    }

    pub fn with_config(
        store: ArtifactStore,
        executor: Box<dyn Executor>,
        settings: Settings,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            executor,
            settings,
            config,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Build every package in the graph, dependencies first. Individual
    /// failures do not abort the run; unaffected subtrees keep building
    /// and the report accounts for every node.
    pub fn materialize(&self, graph: &DependencyGraph) -> MaterializeReport {
        let queue = Mutex::new(JobQueue::new(graph));
        let wakeup = Condvar::new();
        let workers = self.config.workers.max(1).min(graph.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker_loop(graph, &queue, &wakeup));
            }
        });

        queue
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .report
    }

    fn worker_loop(
        &self,
        graph: &DependencyGraph,
        queue: &Mutex<JobQueue>,
        wakeup: &Condvar,
    ) {
        loop {
            let identity = {
                let mut state = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                loop {
                    if state.finished() {
                        wakeup.notify_all();
                        return;
                    }
                    if let Some(identity) = state.next_ready(graph) {
                        break identity;
                    }
                    state = wakeup
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            };

            let node = match graph.node(&identity) {
                Some(node) => node,
                None => return,
            };

            let started = Instant::now();
            let outcome = self.build_one(graph, node);
            let duration = started.elapsed();

            let mut state = queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.complete(graph, identity, outcome, duration);
            wakeup.notify_all();
        }
    }

    /// Materialize one node: reuse a committed artifact when present,
    /// otherwise claim the identity, run the lifecycle against an isolated
    /// work directory, and commit the staged install tree.
    fn build_one(&self, graph: &DependencyGraph, node: &GraphNode) -> JobOutcome {
        let identity = &node.identity;

        let guard = match self.store.claim(identity) {
            Ok(Claim::Committed(artifact)) => {
                self.progress(identity, "cached");
                return JobOutcome::Cached(artifact);
            }
            Ok(Claim::Claimed(guard)) => guard,
            Err(error) => return JobOutcome::Failed(self.store_failure(identity, error)),
        };

        // Another coordinator process may have committed between our graph
        // resolution and the claim; the claim itself re-checks, so from
        // here on the build is ours alone.
        self.progress(identity, "building");

        let work_dir = match self.prepare_work_dir(identity) {
            Ok(dir) => dir,
            Err(failed) => return JobOutcome::Failed(failed),
        };
        let install_dir = match self.store.staging_dir(identity) {
            Ok(dir) => dir,
            Err(error) => return JobOutcome::Failed(self.store_failure(identity, error)),
        };

        let env = self.consumption_env(graph, node);
        let ctx = BuildContext::new(
            identity.clone(),
            work_dir,
            install_dir.clone(),
            node.options.clone(),
            self.settings.clone(),
            self.executor.as_ref(),
        )
        .with_env(env)
        .with_jobs(self.config.jobs)
        .with_verbose(self.config.verbose)
        .with_stage_timeout(self.config.stage_timeout);

        if self.config.install_tools {
            self.bootstrap_tools(node, &ctx);
        }

        for stage in LifecycleStage::all() {
            if matches!(stage, LifecycleStage::SelfTest) && self.config.skip_tests {
                continue;
            }
            if let Err(error) = node.recipe.run_stage(stage, &ctx) {
                self.progress(identity, "failed");
                drop(guard);
                return JobOutcome::Failed(BuildFailed::from_lifecycle(identity.clone(), error));
            }
        }

        match self.store.commit(identity, &install_dir) {
            Ok(artifact) => {
                self.progress(identity, "done");
                drop(guard);
                JobOutcome::Built(artifact)
            }
            Err(error) => {
                drop(guard);
                JobOutcome::Failed(self.store_failure(identity, error))
            }
        }
    }

    fn prepare_work_dir(&self, identity: &PackageIdentity) -> Result<PathBuf, BuildFailed> {
        let root = match &self.config.work_root {
            Some(root) => root.clone(),
            None => self.store.root().join(".work"),
        };
        let dir = root.join(format!(
            "{}-{}-{}",
            identity.name, identity.version, identity.digest
        ));

        let reset = || -> std::io::Result<()> {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)
        };
        reset().map_err(|error| {
            BuildFailed::from_lifecycle(
                identity.clone(),
                LifecycleError::new(LifecycleStage::FetchSource, LifecycleCause::Io(error)),
            )
        })?;
        Ok(dir)
    }

    /// Aggregate consumption metadata of the node's dependency closure
    /// into the standard autotools environment.
    fn consumption_env(&self, graph: &DependencyGraph, node: &GraphNode) -> HashMap<String, String> {
        let mut closure = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<&PackageIdentity> = node.dependencies.iter().collect();
        while let Some(identity) = stack.pop() {
            if !seen.insert(identity.clone()) {
                continue;
            }
            if let Some(dep) = graph.node(identity) {
                closure.push(dep);
                stack.extend(dep.dependencies.iter());
            }
        }
        // Discovery order keeps the flag ordering stable across runs.
        closure.sort_by_key(|dep| dep.discovery_index);

        let mut pkg_config_path = Vec::new();
        let mut cppflags = Vec::new();
        let mut cflags = Vec::new();
        let mut cxxflags = Vec::new();
        let mut ldflags = Vec::new();
        let mut libs = Vec::new();

        for dep in closure {
            let artifact = match self.store.query(&dep.identity) {
                Ok(artifact) => artifact,
                // Not committed yet means the scheduler has a bug; the
                // recipe will fail loudly on the missing paths anyway.
                Err(_) => continue,
            };
            let resolve = |text: &str| metadata::resolve_placeholder(text, self.store.root());

            pkg_config_path.extend(artifact.pkg_config_dirs.iter().map(|d| resolve(d)));
            cppflags.extend(artifact.include_dirs.iter().map(|d| format!("-I{}", resolve(d))));
            cppflags.extend(artifact.defines.iter().map(|d| format!("-D{}", d)));
            cflags.extend(artifact.cflags.iter().map(|f| resolve(f)));
            cxxflags.extend(artifact.cppflags.iter().map(|f| resolve(f)));
            ldflags.extend(artifact.lib_dirs.iter().map(|d| format!("-L{}", resolve(d))));
            ldflags.extend(artifact.sharedlinkflags.iter().map(|f| resolve(f)));
            libs.extend(artifact.libs.iter().map(|l| format!("-l{}", l)));
        }

        let mut env = HashMap::new();
        let mut export = |name: &str, values: Vec<String>, separator: &str| {
            if !values.is_empty() {
                env.insert(name.to_string(), values.join(separator));
            }
        };
        export("PKG_CONFIG_PATH", pkg_config_path, ":");
        export("CPPFLAGS", cppflags, " ");
        export("CFLAGS", cflags, " ");
        export("CXXFLAGS", cxxflags, " ");
        export("LDFLAGS", ldflags, " ");
        export("LIBS", libs, " ");
        env
    }

    /// Best-effort install of the recipe's declared build tools. A failed
    /// install is only a warning; the build surfaces the real error when a
    /// tool is actually missing.
    fn bootstrap_tools(&self, node: &GraphNode, ctx: &BuildContext) {
        let tools = node.recipe.bootstrap_tools();
        if tools.is_empty() || self.config.tool_installer.is_empty() {
            return;
        }

        let request = ExecRequest::new(&self.config.tool_installer[0], ctx.work_dir.clone())
            .with_args(self.config.tool_installer.iter().skip(1).chain(tools.iter()))
            .with_timeout(self.config.stage_timeout);

        match self.executor.run(&request) {
            Ok(output) if output.success() => {}
            Ok(output) => println!(
                "warning: [{}] tool install exited with status {}",
                node.identity.reference(),
                output.exit_code
            ),
            Err(error) => println!(
                "warning: [{}] tool install failed: {}",
                node.identity.reference(),
                error
            ),
        }
    }

    fn store_failure(&self, identity: &PackageIdentity, error: StoreError) -> BuildFailed {
        BuildFailed::from_lifecycle(
            identity.clone(),
            LifecycleError::other(LifecycleStage::Package, error.to_string()),
        )
    }

    fn progress(&self, identity: &PackageIdentity, what: &str) {
        if self.config.verbose {
            println!("[{}] {}", identity.reference(), what);
        }
    }
}

/// Shared scheduler state guarded by one mutex
struct JobQueue {
    /// Unbuilt direct-dependency counts
    remaining: HashMap<PackageIdentity, usize>,
    ready: Vec<PackageIdentity>,
    /// Jobs that reached a terminal status
    settled: HashSet<PackageIdentity>,
    total: usize,
    report: MaterializeReport,
}

impl JobQueue {
    fn new(graph: &DependencyGraph) -> Self {
        let mut remaining = HashMap::new();
        let mut ready = Vec::new();
        for node in graph.nodes() {
            remaining.insert(node.identity.clone(), node.dependencies.len());
            if node.dependencies.is_empty() {
                ready.push(node.identity.clone());
            }
        }
        Self {
            remaining,
            ready,
            settled: HashSet::new(),
            total: graph.len(),
            report: MaterializeReport::default(),
        }
    }

    fn finished(&self) -> bool {
        self.settled.len() == self.total
    }

    /// Earliest-discovered ready job, matching the deterministic order a
    /// single worker would produce.
    fn next_ready(&mut self, graph: &DependencyGraph) -> Option<PackageIdentity> {
        if self.ready.is_empty() {
            return None;
        }
        let index = self
            .ready
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| graph.node(id).map(|n| n.discovery_index).unwrap_or(usize::MAX))
            .map(|(index, _)| index)?;
        Some(self.ready.swap_remove(index))
    }

    fn complete(
        &mut self,
        graph: &DependencyGraph,
        identity: PackageIdentity,
        outcome: JobOutcome,
        duration: Duration,
    ) {
        self.settled.insert(identity.clone());
        match outcome {
            JobOutcome::Built(artifact) => {
                self.report.jobs.push(JobRecord {
                    identity: identity.clone(),
                    status: JobStatus::Succeeded,
                    duration,
                });
                self.report.artifacts.insert(identity.clone(), artifact);
                self.release_dependents(graph, &identity);
            }
            JobOutcome::Cached(artifact) => {
                self.report.jobs.push(JobRecord {
                    identity: identity.clone(),
                    status: JobStatus::Cached,
                    duration,
                });
                self.report.artifacts.insert(identity.clone(), artifact);
                self.release_dependents(graph, &identity);
            }
            JobOutcome::Failed(failed) => {
                self.report.jobs.push(JobRecord {
                    identity: identity.clone(),
                    status: JobStatus::Failed,
                    duration,
                });
                self.report.failures.push(failed);
                self.skip_dependents(graph, &identity, &identity);
            }
        }
    }

    fn release_dependents(&mut self, graph: &DependencyGraph, identity: &PackageIdentity) {
        for dependent in graph.dependents_of(identity) {
            if self.settled.contains(dependent) {
                continue;
            }
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push(dependent.clone());
                }
            }
        }
    }

    /// Settle every transitive dependent of `identity` as skipped,
    /// naming the failure that started the cascade.
    fn skip_dependents(
        &mut self,
        graph: &DependencyGraph,
        identity: &PackageIdentity,
        root_cause: &PackageIdentity,
    ) {
        for dependent in graph.dependents_of(identity) {
            if self.settled.contains(dependent) {
                continue;
            }
            let dependent = dependent.clone();
            self.settled.insert(dependent.clone());
            self.report.jobs.push(JobRecord {
                identity: dependent.clone(),
                status: JobStatus::Skipped,
                duration: Duration::ZERO,
            });
            self.report.skipped.push(SkippedJob {
                identity: dependent.clone(),
                failed_dependency: root_cause.clone(),
            });
            self.skip_dependents(graph, &dependent, root_cause);
        }
    }
}

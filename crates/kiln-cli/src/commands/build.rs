//! Build command - materialize a package graph into the artifact store

use super::{load_registry, parse_options, select_root, store_root};
use anyhow::{bail, Context, Result};
use kiln_build::coordinator::{Coordinator, CoordinatorConfig};
use kiln_build::error::MaterializeReport;
use kiln_build::executor::SystemExecutor;
use kiln_build::store::ArtifactStore;
use kiln_package::resolver::Resolver;
use kiln_package::settings::Settings;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

pub struct BuildArgs {
    pub package: String,
    pub recipes: PathBuf,
    pub store: Option<PathBuf>,
    pub options: Vec<String>,
    pub settings: Settings,
    pub skip_tests: bool,
    pub install_tools: bool,
    pub jobs: Option<usize>,
    pub workers: Option<usize>,
    pub timeout: Option<u64>,
    pub verbose: bool,
    pub json: bool,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let registry = load_registry(&args.recipes)?;
    let root = select_root(&registry, &args.package)?;
    let options = parse_options(&args.options)?;

    let graph = Resolver::new(&registry)
        .resolve(root, &options, &args.settings)
        .context("dependency resolution failed")?;

    if !args.json {
        println!(
            "Building {} ({} package{})",
            graph.root().reference(),
            graph.len(),
            if graph.len() == 1 { "" } else { "s" }
        );
    }

    let store = ArtifactStore::open(store_root(args.store)?)?;
    let mut config = CoordinatorConfig::default()
        .with_skip_tests(args.skip_tests)
        .with_install_tools(args.install_tools)
        .with_verbose(args.verbose);
    if let Some(jobs) = args.jobs {
        config = config.with_jobs(jobs);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_stage_timeout(Duration::from_secs(timeout));
    }

    let coordinator =
        Coordinator::with_config(store, Box::new(SystemExecutor), args.settings, config);
    let report = coordinator.materialize(&graph);

    if args.json {
        print_json(&report);
    } else {
        print_report(&report);
    }

    if !report.success() {
        bail!("{} package(s) failed to build", report.failures.len());
    }
    if !args.json {
        println!("Committed {}", graph.root());
    }
    Ok(())
}

fn print_report(report: &MaterializeReport) {
    for job in &report.jobs {
        println!(
            "  {:<9} {} ({:.1}s)",
            job.status.name(),
            job.identity.reference(),
            job.duration.as_secs_f64()
        );
    }
    for failure in &report.failures {
        println!(
            "\nerror: {} failed at {}: {}",
            failure.identity.reference(),
            failure.stage.name(),
            failure.cause
        );
        if !failure.output.is_empty() {
            println!("{}", failure.output.trim_end());
        }
    }
    for skipped in &report.skipped {
        println!(
            "warning: {} skipped (depends on failed {})",
            skipped.identity.reference(),
            skipped.failed_dependency.reference()
        );
    }
}

fn print_json(report: &MaterializeReport) {
    let rendered = json!({
        "success": report.success(),
        "jobs": report.jobs.iter().map(|job| json!({
            "reference": job.identity.to_string(),
            "status": job.status.name(),
            "seconds": job.duration.as_secs_f64(),
        })).collect::<Vec<_>>(),
        "failures": report.failures.iter().map(|failure| json!({
            "reference": failure.identity.to_string(),
            "stage": failure.stage.name(),
            "cause": failure.cause.to_string(),
            "output": &failure.output,
        })).collect::<Vec<_>>(),
        "skipped": report.skipped.iter().map(|skipped| json!({
            "reference": skipped.identity.to_string(),
            "failed_dependency": skipped.failed_dependency.to_string(),
        })).collect::<Vec<_>>(),
    });
    println!("{rendered:#}");
}

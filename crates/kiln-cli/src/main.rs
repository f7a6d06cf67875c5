use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::SettingsFlags;

/// Kiln binary package builder.
///
/// Kiln resolves a package's dependency graph from declarative recipes,
/// builds every node in parallel, and commits the results to a content
/// addressed artifact store so identical configurations are never built
/// twice.
///
/// EXAMPLES:
///     kiln build zlib                      Build the newest zlib recipe
///     kiln build zlib/1.2.11 -o shared=true  Pin a version, set an option
///     kiln resolve app --json              Inspect the graph without building
///     kiln query zlib/1.2.11#0123456789abcdef  Show committed metadata
///
/// ENVIRONMENT VARIABLES:
///     KILN_STORE     Artifact store location (default ~/.kiln/store)
///     KILN_RECIPES   Recipe directory (default ./recipes)
///     KILN_OS        Target operating system override
///     KILN_ARCH      Target architecture override
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package and everything it depends on
    ///
    /// Resolves the dependency graph for the named package, builds each
    /// node whose identity is not yet in the store, and prints a per-job
    /// report. A failed node skips its dependents but unaffected subtrees
    /// keep building.
    ///
    /// EXAMPLES:
    ///     kiln build zlib                       Newest registered version
    ///     kiln build zlib/1.2.11                Exact version pin
    ///     kiln build app -o shared=true -j 8    Root options, 8-way make
    #[command(visible_alias = "b")]
    Build {
        /// Package to build: NAME, NAME/VERSION, or NAME/REQUIREMENT
        package: String,
        /// Directory of recipe manifests (*.toml)
        #[arg(long, short = 'r', env = "KILN_RECIPES", default_value = "recipes")]
        recipes: PathBuf,
        /// Artifact store location
        #[arg(long, env = "KILN_STORE")]
        store: Option<PathBuf>,
        /// Root package option, repeatable
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
        #[command(flatten)]
        settings: SettingsFlags,
        /// Skip each recipe's self-test stage
        #[arg(long)]
        skip_tests: bool,
        /// Attempt to install declared build tools before building
        #[arg(long)]
        install_tools: bool,
        /// Parallelism hint passed to recipes (make -j)
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        /// Concurrent package builds (defaults to available cores)
        #[arg(long)]
        workers: Option<usize>,
        /// Per-stage timeout in seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
        /// Print each command as it runs
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Report as JSON
        #[arg(long, env = "KILN_JSON")]
        json: bool,
    },

    /// Resolve and print a dependency graph without building
    ///
    /// EXAMPLES:
    ///     kiln resolve app             Build order with identities
    ///     kiln resolve app --json      Machine-readable graph
    Resolve {
        /// Package to resolve: NAME, NAME/VERSION, or NAME/REQUIREMENT
        package: String,
        /// Directory of recipe manifests (*.toml)
        #[arg(long, short = 'r', env = "KILN_RECIPES", default_value = "recipes")]
        recipes: PathBuf,
        /// Root package option, repeatable
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
        #[command(flatten)]
        settings: SettingsFlags,
        /// Report as JSON
        #[arg(long, env = "KILN_JSON")]
        json: bool,
    },

    /// Show committed artifact metadata from the store
    ///
    /// EXAMPLES:
    ///     kiln query zlib/1.2.11#0123456789abcdef
    Query {
        /// Full package reference: NAME/VERSION#DIGEST
        reference: String,
        /// Artifact store location
        #[arg(long, env = "KILN_STORE")]
        store: Option<PathBuf>,
        /// Report as JSON
        #[arg(long, env = "KILN_JSON")]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            package,
            recipes,
            store,
            options,
            settings,
            skip_tests,
            install_tools,
            jobs,
            workers,
            timeout,
            verbose,
            json,
        } => commands::build::run(commands::build::BuildArgs {
            package,
            recipes,
            store,
            options,
            settings: commands::settings_of(&settings)?,
            skip_tests,
            install_tools,
            jobs,
            workers,
            timeout,
            verbose,
            json,
        }),
        Commands::Resolve {
            package,
            recipes,
            options,
            settings,
            json,
        } => commands::resolve::run(commands::resolve::ResolveArgs {
            package,
            recipes,
            options,
            settings: commands::settings_of(&settings)?,
            json,
        }),
        Commands::Query {
            reference,
            store,
            json,
        } => commands::query::run(commands::query::QueryArgs {
            reference,
            store,
            json,
        }),
    }
}

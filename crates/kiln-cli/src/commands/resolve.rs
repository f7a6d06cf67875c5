//! Resolve command - print a dependency graph without building it

use super::{load_registry, parse_options, select_root};
use anyhow::{Context, Result};
use kiln_package::resolver::Resolver;
use kiln_package::settings::Settings;
use serde_json::json;
use std::path::PathBuf;

pub struct ResolveArgs {
    pub package: String,
    pub recipes: PathBuf,
    pub options: Vec<String>,
    pub settings: Settings,
    pub json: bool,
}

pub fn run(args: ResolveArgs) -> Result<()> {
    let registry = load_registry(&args.recipes)?;
    let root = select_root(&registry, &args.package)?;
    let options = parse_options(&args.options)?;

    let graph = Resolver::new(&registry)
        .resolve(root, &options, &args.settings)
        .context("dependency resolution failed")?;

    let order = graph.topological_order();

    if args.json {
        let packages: Vec<_> = order
            .iter()
            .filter_map(|identity| graph.node(identity))
            .map(|node| {
                json!({
                    "name": &node.identity.name,
                    "version": node.identity.version.to_string(),
                    "digest": &node.identity.digest,
                    "options": &node.options,
                    "dependencies": node.dependencies.iter()
                        .map(|dep| dep.to_string())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let rendered = json!({
            "root": graph.root().reference(),
            "build_order": packages,
        });
        println!("{rendered:#}");
        return Ok(());
    }

    println!("Build order for {}:", graph.root().reference());
    for (index, identity) in order.iter().enumerate() {
        println!("  {:>3}. {}", index + 1, identity);
        if let Some(node) = graph.node(identity) {
            for dependency in &node.dependencies {
                println!("       requires {}", dependency.reference());
            }
        }
    }
    Ok(())
}

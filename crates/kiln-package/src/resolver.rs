//! Dependency resolution: expanding a root recipe into the closed,
//! ordered graph of package identities to build.

use crate::graph::{DependencyGraph, GraphNode};
use crate::identity::identity_of;
use crate::options::{BuildOptions, OptionError};
use crate::recipe::{Recipe, RecipeRegistry};
use crate::settings::Settings;
use semver::VersionReq;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error(transparent)]
    InvalidOption(#[from] OptionError),

    #[error("package not found in registry: {0}")]
    PackageNotFound(String),

    #[error("version conflict for '{name}': {}", format_constraints(.constraints))]
    VersionConflict {
        name: String,
        constraints: Vec<ConstraintSource>,
    },

    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// A version constraint together with the package that demanded it
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSource {
    pub requirement: VersionReq,
    pub requirer: String,
}

impl fmt::Display for ConstraintSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (required by {})", self.requirement, self.requirer)
    }
}

fn format_constraints(constraints: &[ConstraintSource]) -> String {
    constraints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-package selection state during expansion
struct Selected {
    recipe: Arc<dyn Recipe>,
    options: BuildOptions,
}

/// Breadth-first dependency resolver over a recipe registry.
///
/// The resolver computes identities and ordering only; it never builds
/// anything. Resolution failures surface unrecovered: there is no implicit
/// "pick latest" fallback on conflicting constraints.
pub struct Resolver<'r> {
    registry: &'r RecipeRegistry,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r RecipeRegistry) -> Self {
        Self { registry }
    }

    /// Expand the closed transitive graph for `root` built with
    /// `root_options` under `settings`. Dependencies build with their
    /// schema defaults; only the root takes caller options.
    pub fn resolve(
        &self,
        root: Arc<dyn Recipe>,
        root_options: &[(String, String)],
        settings: &Settings,
    ) -> ResolverResult<DependencyGraph> {
        let root_name = root.name().to_string();
        let root_opts = root.options().resolve(&root_name, root_options)?;

        let mut selected: HashMap<String, Selected> = HashMap::new();
        let mut constraints: HashMap<String, Vec<ConstraintSource>> = HashMap::new();
        let mut name_deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut discovery: Vec<String> = vec![root_name.clone()];
        let mut queue: VecDeque<String> = VecDeque::new();

        selected.insert(
            root_name.clone(),
            Selected {
                recipe: Arc::clone(&root),
                options: root_opts,
            },
        );
        queue.push_back(root_name.clone());

        while let Some(current) = queue.pop_front() {
            // A re-expansion replaces whatever this requirer demanded the
            // last time it was expanded.
            for sources in constraints.values_mut() {
                sources.retain(|source| source.requirer != current);
            }

            let (recipe, options) = {
                let entry = &selected[&current];
                (Arc::clone(&entry.recipe), entry.options.clone())
            };

            let requirements = recipe.requirements(&options, settings);
            let mut deps = Vec::with_capacity(requirements.len());

            for requirement in requirements {
                let dep_name = requirement.name.clone();

                if self.registry.versions(&dep_name).is_none() && dep_name != root_name {
                    return Err(ResolverError::PackageNotFound(dep_name));
                }

                constraints
                    .entry(dep_name.clone())
                    .or_default()
                    .push(ConstraintSource {
                        requirement: requirement.constraint.clone(),
                        requirer: current.clone(),
                    });

                let pick = self.pick(&dep_name, &constraints[&dep_name], &selected)?;

                match selected.get(&dep_name) {
                    Some(existing) if existing.recipe.version() == pick.version() => {}
                    _ => {
                        // First sighting, or a narrowed constraint changed
                        // the pick: (re-)expand with the new version. The
                        // abandoned version's demands must stop influencing
                        // picks right away, not only once the dependency
                        // comes back off the queue.
                        for sources in constraints.values_mut() {
                            sources.retain(|source| source.requirer != dep_name);
                        }
                        let defaults = pick.options().defaults();
                        selected.insert(
                            dep_name.clone(),
                            Selected {
                                recipe: pick,
                                options: defaults,
                            },
                        );
                        if !discovery.contains(&dep_name) {
                            discovery.push(dep_name.clone());
                        }
                        name_deps.remove(&dep_name);
                        queue.push_back(dep_name.clone());
                    }
                }

                if !deps.contains(&dep_name) {
                    deps.push(dep_name);
                }
            }

            name_deps.insert(current, deps);
        }

        detect_cycle(&root_name, &name_deps)?;

        // A narrowed pick can abandon a version whose own dependencies
        // were already expanded; only names still reachable from the root
        // become graph nodes.
        let mut reachable = HashSet::new();
        let mut stack = vec![root_name.clone()];
        while let Some(name) = stack.pop() {
            if reachable.insert(name.clone()) {
                if let Some(deps) = name_deps.get(&name) {
                    stack.extend(deps.iter().cloned());
                }
            }
        }

        // Assemble the identity graph in discovery order.
        let root_identity = {
            let entry = &selected[&root_name];
            identity_of(entry.recipe.as_ref(), &entry.options, settings)
        };
        let mut graph = DependencyGraph::new(root_identity);

        for (index, name) in discovery
            .iter()
            .filter(|name| reachable.contains(*name))
            .enumerate()
        {
            let entry = &selected[name];
            let identity = identity_of(entry.recipe.as_ref(), &entry.options, settings);
            let dependencies = name_deps
                .get(name)
                .map(|deps| {
                    deps.iter()
                        .map(|dep| {
                            let dep_entry = &selected[dep];
                            identity_of(dep_entry.recipe.as_ref(), &dep_entry.options, settings)
                        })
                        .collect()
                })
                .unwrap_or_default();

            graph.add_node(GraphNode::new(
                identity,
                Arc::clone(&entry.recipe),
                entry.options.clone(),
                dependencies,
                index,
            ));
        }

        Ok(graph)
    }

    /// Maximum registry version of `name` satisfying every accumulated
    /// constraint. The root recipe itself satisfies requirements on its own
    /// name even when it is not registered.
    fn pick(
        &self,
        name: &str,
        constraints: &[ConstraintSource],
        selected: &HashMap<String, Selected>,
    ) -> ResolverResult<Arc<dyn Recipe>> {
        let accumulated: Vec<VersionReq> = constraints
            .iter()
            .map(|c| c.requirement.clone())
            .collect();

        if let Some(found) = self.registry.find_max_satisfying(name, &accumulated) {
            return Ok(found);
        }

        // Fall back to an already-selected unregistered recipe (the root).
        if let Some(existing) = selected.get(name) {
            if accumulated
                .iter()
                .all(|req| req.matches(existing.recipe.version()))
            {
                return Ok(Arc::clone(&existing.recipe));
            }
        }

        Err(ResolverError::VersionConflict {
            name: name.to_string(),
            constraints: constraints.to_vec(),
        })
    }
}

/// Depth-first search over the name-level requirement graph; reports the
/// first cycle found as an explicit path.
fn detect_cycle(
    root: &str,
    name_deps: &HashMap<String, Vec<String>>,
) -> ResolverResult<()> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        name: &'a str,
        name_deps: &'a HashMap<String, Vec<String>>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> ResolverResult<()> {
        if let Some(start) = stack.iter().position(|seen| *seen == name) {
            let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            path.push(name.to_string());
            return Err(ResolverError::CyclicDependency { path });
        }
        if !visited.insert(name) {
            return Ok(());
        }

        stack.push(name);
        if let Some(deps) = name_deps.get(name) {
            for dep in deps {
                visit(dep, name_deps, visited, stack)?;
            }
        }
        stack.pop();
        Ok(())
    }

    visit(root, name_deps, &mut visited, &mut stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BuildContext;
    use crate::options::OptionSchema;
    use crate::recipe::{LifecycleResult, Requirement};
    use crate::settings::{BuildType, Compiler};
    use semver::Version;

    struct Stub {
        name: String,
        version: Version,
        schema: OptionSchema,
        requires: Vec<Requirement>,
    }

    impl Stub {
        fn new(name: &str, version: &str, requires: &[(&str, &str)]) -> Arc<dyn Recipe> {
            Arc::new(Self {
                name: name.to_string(),
                version: version.parse().unwrap(),
                schema: OptionSchema::new().with_option("shared", &["true", "false"], "true"),
                requires: requires
                    .iter()
                    .map(|(n, c)| Requirement::new(*n, c).unwrap())
                    .collect(),
            })
        }
    }

    impl Recipe for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &Version {
            &self.version
        }

        fn options(&self) -> &OptionSchema {
            &self.schema
        }

        fn requirements(&self, _: &BuildOptions, _: &Settings) -> Vec<Requirement> {
            self.requires.clone()
        }

        fn fetch_source(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn configure(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn build(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }

        fn package_install(&self, _: &BuildContext) -> LifecycleResult {
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings::new("linux", "x86_64", BuildType::Release, Compiler::new("gcc", "12"))
    }

    #[test]
    fn test_resolve_single_package() {
        let registry = RecipeRegistry::new();
        let root = Stub::new("zlib", "1.2.11", &[]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.root().name, "zlib");
        assert_eq!(graph.topological_order()[0].name, "zlib");
    }

    #[test]
    fn test_resolve_chain_orders_dependencies_first() {
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("b", "1.0.0", &[("c", "^1")]));
        registry.register(Stub::new("c", "1.4.0", &[]));
        let root = Stub::new("a", "1.0.0", &[("b", "^1")]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();
        let order: Vec<String> = graph
            .topological_order()
            .iter()
            .map(|id| id.name.clone())
            .collect();

        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_resolve_diamond_dedups_shared_dependency() {
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("left", "1.0.0", &[("bottom", "^1")]));
        registry.register(Stub::new("right", "1.0.0", &[("bottom", "^1")]));
        registry.register(Stub::new("bottom", "1.0.0", &[]));
        let root = Stub::new("root", "1.0.0", &[("left", "^1"), ("right", "^1")]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();

        assert_eq!(graph.len(), 4);
        let bottoms = graph
            .nodes()
            .filter(|node| node.identity.name == "bottom")
            .count();
        assert_eq!(bottoms, 1);
    }

    #[test]
    fn test_resolve_missing_dependency_fails() {
        let registry = RecipeRegistry::new();
        let root = Stub::new("a", "1.0.0", &[("ghost", "^1")]);

        let err = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap_err();
        assert!(matches!(err, ResolverError::PackageNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_resolve_version_conflict() {
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("left", "1.0.0", &[("dep", "^1")]));
        registry.register(Stub::new("right", "1.0.0", &[("dep", "^2")]));
        registry.register(Stub::new("dep", "1.0.0", &[]));
        registry.register(Stub::new("dep", "2.0.0", &[]));
        let root = Stub::new("root", "1.0.0", &[("left", "^1"), ("right", "^1")]);

        let err = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap_err();
        assert!(matches!(err, ResolverError::VersionConflict { name, .. } if name == "dep"));
    }

    #[test]
    fn test_resolve_narrowed_constraint_reselects() {
        // First requirer accepts anything; the second requires the 1.x line.
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("first", "1.0.0", &[("dep", "*")]));
        registry.register(Stub::new("second", "1.0.0", &[("dep", "^1")]));
        registry.register(Stub::new("dep", "1.0.0", &[]));
        registry.register(Stub::new("dep", "2.0.0", &[]));
        let root = Stub::new("root", "1.0.0", &[("first", "^1"), ("second", "^1")]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();
        let dep = graph
            .nodes()
            .find(|node| node.identity.name == "dep")
            .unwrap();
        assert_eq!(dep.identity.version.to_string(), "1.0.0");
    }

    #[test]
    fn test_resolve_repick_drops_abandoned_subtree() {
        // a@2 pulls in x, but b narrows a to the 1.x line, which needs
        // nothing. x must not survive as a node nothing requires.
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("a", "2.0.0", &[("x", "^1")]));
        registry.register(Stub::new("a", "1.0.0", &[]));
        registry.register(Stub::new("x", "1.0.0", &[]));
        registry.register(Stub::new("b", "1.0.0", &[("a", "^1")]));
        let root = Stub::new("root", "1.0.0", &[("a", "*"), ("b", "^1")]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();

        let names: Vec<&str> = graph
            .nodes()
            .map(|node| node.identity.name.as_str())
            .collect();
        assert_eq!(names, ["root", "a", "b"]);

        let a = graph
            .nodes()
            .find(|node| node.identity.name == "a")
            .unwrap();
        assert_eq!(a.identity.version.to_string(), "1.0.0");
        assert!(a.dependencies.is_empty());
    }

    #[test]
    fn test_resolve_repick_forgets_abandoned_constraints() {
        // The abandoned a@2 demanded x ^1; once b narrows a to 1.x, that
        // demand must not conflict with b's own x ^2.
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("a", "2.0.0", &[("x", "^1")]));
        registry.register(Stub::new("a", "1.0.0", &[]));
        registry.register(Stub::new("x", "1.0.0", &[]));
        registry.register(Stub::new("x", "2.0.0", &[]));
        registry.register(Stub::new("b", "1.0.0", &[("a", "^1"), ("x", "^2")]));
        let root = Stub::new("root", "1.0.0", &[("a", "*"), ("b", "^1")]);

        let graph = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap();

        let x = graph
            .nodes()
            .find(|node| node.identity.name == "x")
            .unwrap();
        assert_eq!(x.identity.version.to_string(), "2.0.0");
    }

    #[test]
    fn test_resolve_cycle_detected() {
        let mut registry = RecipeRegistry::new();
        registry.register(Stub::new("a", "1.0.0", &[("b", "^1")]));
        registry.register(Stub::new("b", "1.0.0", &[("a", "^1")]));
        let root = Stub::new("a", "1.0.0", &[("b", "^1")]);

        let err = Resolver::new(&registry)
            .resolve(root, &[], &settings())
            .unwrap_err();
        match err {
            ResolverError::CyclicDependency { path } => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_invalid_root_option_fails_fast() {
        let registry = RecipeRegistry::new();
        let root = Stub::new("zlib", "1.2.11", &[]);

        let err = Resolver::new(&registry)
            .resolve(
                root,
                &[("shared".to_string(), "maybe".to_string())],
                &settings(),
            )
            .unwrap_err();
        assert!(matches!(err, ResolverError::InvalidOption(_)));
    }

    #[test]
    fn test_resolve_option_order_yields_same_root_identity() {
        let registry = RecipeRegistry::new();

        let graph_a = Resolver::new(&registry)
            .resolve(
                Stub::new("zlib", "1.2.11", &[]),
                &[("shared".to_string(), "false".to_string())],
                &settings(),
            )
            .unwrap();
        let graph_b = Resolver::new(&registry)
            .resolve(
                Stub::new("zlib", "1.2.11", &[]),
                &[("shared".to_string(), "false".to_string())],
                &settings(),
            )
            .unwrap();

        assert_eq!(graph_a.root(), graph_b.root());
    }
}

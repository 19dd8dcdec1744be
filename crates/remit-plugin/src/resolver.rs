//! Dependency resolution.
//!
//! Orders plugins so that every plugin comes after all of its dependencies,
//! using Kahn's algorithm with a name-ordered ready set. Plugins with no
//! ordering constraint between them therefore come out sorted by name, which
//! keeps initialization order reproducible.
//!
//! Cycles are checked first, so a cyclic graph always fails with
//! [`PluginError::CyclicDependency`] regardless of any other problem. Missing
//! dependencies and unsatisfied version constraints are reported next.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::descriptor::PluginDescriptor;
use crate::error::{PluginError, PluginResult};

/// Returns plugin names in dependency order.
pub fn resolve<'a, I>(descriptors: I) -> PluginResult<Vec<String>>
where
    I: IntoIterator<Item = &'a PluginDescriptor>,
{
    let by_name: BTreeMap<&str, &PluginDescriptor> = descriptors
        .into_iter()
        .map(|d| (d.name.as_str(), d))
        .collect();

    // Edges only between known plugins; unknown names are reported below.
    let mut in_degree: BTreeMap<&str, usize> = by_name.keys().map(|n| (*n, 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, desc) in &by_name {
        for dep in &desc.dependencies {
            if let Some((dep_name, _)) = by_name.get_key_value(dep.name.as_str()) {
                dependents.entry(*dep_name).or_default().push(*name);
                if let Some(d) = in_degree.get_mut(name) {
                    *d += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(by_name.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for &next in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if order.len() != by_name.len() {
        let remaining: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect();
        return Err(PluginError::CyclicDependency {
            cycle: find_cycle(&by_name, &remaining),
        });
    }

    for desc in by_name.values() {
        for dep in &desc.dependencies {
            let Some(target) = by_name.get(dep.name.as_str()) else {
                return Err(PluginError::MissingDependency {
                    plugin: desc.name.clone(),
                    dependency: dep.name.clone(),
                });
            };
            if !dep.constraint.matches(&target.version) {
                return Err(PluginError::VersionConstraint {
                    plugin: desc.name.clone(),
                    dependency: dep.name.clone(),
                    constraint: dep.constraint.to_string(),
                    found: target.version.to_string(),
                });
            }
        }
    }

    debug!(order = ?order, "Plugin dependencies resolved");
    Ok(order)
}

/// Walks dependency edges inside the unresolved set until a plugin repeats.
///
/// Every unresolved plugin has at least one unresolved dependency, so the walk
/// always closes. The result reads "a requires b requires … requires a".
fn find_cycle(by_name: &BTreeMap<&str, &PluginDescriptor>, remaining: &BTreeSet<&str>) -> Vec<String> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = vec![start];
    let mut current = start;

    loop {
        let next = by_name.get(current).and_then(|d| {
            d.dependencies
                .iter()
                .map(|dep| dep.name.as_str())
                .filter(|n| remaining.contains(n))
                .min()
        });
        let Some(next) = next else {
            // Unreachable for a well-formed remaining set.
            return path.iter().map(|s| s.to_string()).collect();
        };
        if let Some(pos) = path.iter().position(|n| *n == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remit_core::PluginCategory;
    use semver::Version;

    fn plugin(name: &str, version: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, Version::parse(version).unwrap(), PluginCategory::Payment)
    }

    fn dep(desc: PluginDescriptor, name: &str, constraint: &str) -> PluginDescriptor {
        desc.depends_on(name, constraint.parse().unwrap())
    }

    #[test]
    fn test_order_is_deterministic_by_name() {
        let plugins = vec![
            plugin("zeta", "1.0.0"),
            dep(plugin("beta", "1.0.0"), "zeta", "^1.0.0"),
            plugin("alpha", "1.0.0"),
            dep(plugin("gamma", "1.0.0"), "alpha", "*"),
        ];
        let order = resolve(&plugins).unwrap();
        assert_eq!(order, vec!["alpha", "gamma", "zeta", "beta"]);
    }

    #[test]
    fn test_cycle_reports_path() {
        let plugins = vec![
            dep(plugin("a", "1.0.0"), "b", "*"),
            dep(plugin("b", "1.0.0"), "c", "*"),
            dep(plugin("c", "1.0.0"), "a", "*"),
            plugin("d", "1.0.0"),
        ];
        match resolve(&plugins) {
            Err(PluginError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_wins_over_version_mismatch() {
        let plugins = vec![
            dep(plugin("a", "1.0.0"), "b", "^9.0.0"),
            dep(plugin("b", "1.0.0"), "a", "*"),
        ];
        assert!(matches!(
            resolve(&plugins),
            Err(PluginError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let plugins = vec![dep(plugin("solo", "1.0.0"), "solo", "*")];
        match resolve(&plugins) {
            Err(PluginError::CyclicDependency { cycle }) => assert_eq!(cycle, vec!["solo", "solo"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_version_constraint_names_dependency() {
        let plugins = vec![
            plugin("a", "1.5.0"),
            dep(plugin("b", "1.0.0"), "a", "^2.0.0"),
        ];
        match resolve(&plugins) {
            Err(PluginError::VersionConstraint {
                plugin,
                dependency,
                constraint,
                found,
            }) => {
                assert_eq!(plugin, "b");
                assert_eq!(dependency, "a");
                assert_eq!(constraint, "^2.0.0");
                assert_eq!(found, "1.5.0");
            }
            other => panic!("expected version error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let plugins = vec![dep(plugin("b", "1.0.0"), "ghost", "*")];
        assert!(matches!(
            resolve(&plugins),
            Err(PluginError::MissingDependency { dependency, .. }) if dependency == "ghost"
        ));
    }
}

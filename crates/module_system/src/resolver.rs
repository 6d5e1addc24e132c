//! Dependency resolution.
//!
//! Turns the discovered bundles into a load order:
//!
//! 1. every bundle whose id is declared more than once is dropped
//! 2. bundles with dependencies missing from the remaining set are dropped,
//!    repeatedly, until a pass removes nothing
//! 3. survivors are sorted by id
//! 4. bundles in a dependency cycle (including self-dependencies) are dropped,
//!    then step 2 runs again so their dependents go too
//! 5. survivors are emitted in a stable topological order
//!
//! Every dropped bundle has its archive released before [`resolve`] returns.

use crate::archive::BundleRecord;
use crate::error::RemovalReason;
use module_api::Manifest;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, error, info};

/// What the resolver needs from a bundle.
pub trait ResolvableBundle {
    fn manifest(&self) -> &Manifest;

    /// Releases any handle the bundle holds. Called once when it is dropped.
    fn release(&mut self);

    fn id(&self) -> &str {
        &self.manifest().id
    }
}

impl ResolvableBundle for BundleRecord {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn release(&mut self) {
        self.archive.release();
    }
}

/// A bundle the resolver refused to load.
#[derive(Debug)]
pub struct RemovedBundle<B = BundleRecord> {
    pub record: B,
    pub reason: RemovalReason,
}

/// Output of [`resolve`].
#[derive(Debug)]
pub struct Resolution<B = BundleRecord> {
    /// Bundles to load, dependencies first
    pub ordered: Vec<B>,
    /// Dropped bundles, in the order they were dropped
    pub removed: Vec<RemovedBundle<B>>,
}

impl<B: ResolvableBundle> Resolution<B> {
    /// Ids of the ordered bundles.
    pub fn order(&self) -> Vec<String> {
        self.ordered.iter().map(|b| b.id().to_string()).collect()
    }

    /// Reason a bundle with this id was dropped, if it was.
    pub fn removal_reason(&self, id: &str) -> Option<&RemovalReason> {
        self.removed
            .iter()
            .find(|r| r.record.id() == id)
            .map(|r| &r.reason)
    }
}

fn drop_bundle<B: ResolvableBundle>(
    mut record: B,
    reason: RemovalReason,
    removed: &mut Vec<RemovedBundle<B>>,
) {
    error!("Module {} will not be loaded: {}", record.id(), reason);
    record.release();
    removed.push(RemovedBundle { record, reason });
}

/// Computes the load order for `records`.
///
/// # Arguments
///
/// * `records` - Discovered bundles, in any order
///
/// # Returns
///
/// The ordered survivors and the removed bundles with their reasons.
pub fn resolve<B: ResolvableBundle>(records: Vec<B>) -> Resolution<B> {
    let total = records.len();
    let mut removed = Vec::new();

    let survivors = remove_duplicates(records, &mut removed);
    let mut survivors = remove_missing_dependencies(survivors, &mut removed);
    survivors.sort_by(|a, b| a.id().cmp(b.id()));
    let survivors = remove_cycles(survivors, &mut removed);
    let survivors = remove_missing_dependencies(survivors, &mut removed);
    let ordered = stable_topological_order(survivors);

    info!(
        "Resolved {} of {} bundles ({} removed)",
        ordered.len(),
        total,
        removed.len()
    );
    Resolution { ordered, removed }
}

fn remove_duplicates<B: ResolvableBundle>(
    records: Vec<B>,
    removed: &mut Vec<RemovedBundle<B>>,
) -> Vec<B> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in &records {
        *counts.entry(record.id().to_string()).or_default() += 1;
    }

    let mut survivors = Vec::with_capacity(records.len());
    for record in records {
        if counts.get(record.id()).copied().unwrap_or(0) > 1 {
            drop_bundle(record, RemovalReason::DuplicateId, removed);
        } else {
            survivors.push(record);
        }
    }
    survivors
}

fn remove_missing_dependencies<B: ResolvableBundle>(
    mut survivors: Vec<B>,
    removed: &mut Vec<RemovedBundle<B>>,
) -> Vec<B> {
    loop {
        let present: HashSet<String> = survivors.iter().map(|b| b.id().to_string()).collect();
        let mut kept = Vec::with_capacity(survivors.len());
        let mut dropped_any = false;

        for record in survivors {
            let mut missing: Vec<String> = Vec::new();
            for dep in &record.manifest().dependencies {
                if !present.contains(dep) && !missing.contains(dep) {
                    missing.push(dep.clone());
                }
            }

            if missing.is_empty() {
                kept.push(record);
            } else {
                dropped_any = true;
                drop_bundle(record, RemovalReason::MissingDependencies { missing }, removed);
            }
        }

        survivors = kept;
        if !dropped_any {
            return survivors;
        }
    }
}

/// Dependency edges as indices into `records`. Unknown ids are ignored.
fn dependency_graph<B: ResolvableBundle>(records: &[B]) -> Vec<Vec<usize>> {
    let index: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id(), i))
        .collect();
    records
        .iter()
        .map(|b| {
            b.manifest()
                .dependencies
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect()
}

/// Tarjan's strongly connected components.
struct Tarjan<'a> {
    graph: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn run(graph: &'a [Vec<usize>]) -> Vec<Vec<usize>> {
        let n = graph.len();
        let mut tarjan = Tarjan {
            graph,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        };
        for v in 0..n {
            if tarjan.index[v].is_none() {
                tarjan.strong_connect(v);
            }
        }
        tarjan.components
    }

    fn strong_connect(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let graph = self.graph;
        for &w in &graph[v] {
            match self.index[w] {
                None => {
                    self.strong_connect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if self.index[v] == Some(self.lowlink[v]) {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

fn remove_cycles<B: ResolvableBundle>(
    survivors: Vec<B>,
    removed: &mut Vec<RemovedBundle<B>>,
) -> Vec<B> {
    let graph = dependency_graph(&survivors);
    let mut cycle_of: Vec<Option<Vec<String>>> = vec![None; survivors.len()];

    for component in Tarjan::run(&graph) {
        let cyclic = component.len() > 1 || graph[component[0]].contains(&component[0]);
        if !cyclic {
            continue;
        }
        let mut members: Vec<String> = component
            .iter()
            .map(|&i| survivors[i].id().to_string())
            .collect();
        members.sort();
        for &i in &component {
            cycle_of[i] = Some(members.clone());
        }
    }

    let mut kept = Vec::with_capacity(survivors.len());
    for (record, cycle) in survivors.into_iter().zip(cycle_of) {
        match cycle {
            Some(members) => drop_bundle(record, RemovalReason::Cycle { members }, removed),
            None => kept.push(record),
        }
    }
    kept
}

/// Orders id-sorted, acyclic, closed `sorted` so dependencies come first.
///
/// Kahn's algorithm with a min-heap on the sorted index: the next bundle is
/// always the lowest id whose dependencies have all been emitted, so bundles
/// with no ordering constraint between them keep their id order.
fn stable_topological_order<B: ResolvableBundle>(sorted: Vec<B>) -> Vec<B> {
    let graph = dependency_graph(&sorted);
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); sorted.len()];
    let mut pending = vec![0usize; sorted.len()];
    for (node, deps) in graph.iter().enumerate() {
        let unique: HashSet<usize> = deps.iter().copied().collect();
        pending[node] = unique.len();
        for dep in unique {
            dependents[dep].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count == 0)
        .map(|(node, _)| Reverse(node))
        .collect();
    let mut order = Vec::with_capacity(sorted.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in &dependents[node] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    let mut slots: Vec<Option<B>> = sorted.into_iter().map(Some).collect();
    let ordered: Vec<B> = order.into_iter().filter_map(|i| slots[i].take()).collect();
    debug!(
        "Load order: {}",
        ordered.iter().map(|b| b.id()).collect::<Vec<_>>().join(", ")
    );
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stub {
        manifest: Manifest,
        released: usize,
    }

    impl ResolvableBundle for Stub {
        fn manifest(&self) -> &Manifest {
            &self.manifest
        }

        fn release(&mut self) {
            self.released += 1;
        }
    }

    fn stub(id: &str, deps: &[&str]) -> Stub {
        Stub {
            manifest: Manifest::new(id).with_dependencies(deps.iter().copied()),
            released: 0,
        }
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_end_to_end_example() {
        let resolution = resolve(vec![
            stub("ui", &["core"]),
            stub("core", &[]),
            stub("orphan", &["ghost"]),
        ]);

        assert_eq!(resolution.order(), vec!["core", "ui"]);
        assert_eq!(
            resolution.removal_reason("orphan"),
            Some(&RemovalReason::MissingDependencies {
                missing: vec!["ghost".to_string()]
            })
        );
        assert_eq!(resolution.removed[0].record.released, 1);
        assert!(resolution.ordered.iter().all(|b| b.released == 0));
    }

    #[test]
    fn test_independent_bundles_sorted_by_id() {
        let resolution = resolve(vec![stub("b", &[]), stub("a", &[])]);
        assert_eq!(resolution.order(), vec!["a", "b"]);
    }

    #[test]
    fn test_dependency_overrides_id_order() {
        let resolution = resolve(vec![stub("a", &["b"]), stub("b", &[])]);
        assert_eq!(resolution.order(), vec!["b", "a"]);
    }

    #[test]
    fn test_transitive_missing_dependencies() {
        let resolution = resolve(vec![
            stub("a", &["b"]),
            stub("b", &["c"]),
            stub("c", &["missing"]),
            stub("d", &[]),
        ]);

        assert_eq!(resolution.order(), vec!["d"]);
        assert_eq!(resolution.removed.len(), 3);
        assert!(resolution.removed.iter().all(|r| r.record.released == 1));
        assert_eq!(
            resolution.removal_reason("a"),
            Some(&RemovalReason::MissingDependencies {
                missing: vec!["b".to_string()]
            })
        );
    }

    #[test]
    fn test_two_cycle_is_rejected() {
        let resolution = resolve(vec![stub("x", &["y"]), stub("y", &["x"]), stub("z", &[])]);

        assert_eq!(resolution.order(), vec!["z"]);
        let expected = RemovalReason::Cycle {
            members: vec!["x".to_string(), "y".to_string()],
        };
        assert_eq!(resolution.removal_reason("x"), Some(&expected));
        assert_eq!(resolution.removal_reason("y"), Some(&expected));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resolution = resolve(vec![stub("loop", &["loop"])]);
        assert!(resolution.ordered.is_empty());
        assert_eq!(
            resolution.removal_reason("loop"),
            Some(&RemovalReason::Cycle {
                members: vec!["loop".to_string()]
            })
        );
    }

    #[test]
    fn test_dependents_of_cycles_are_dropped() {
        let resolution = resolve(vec![
            stub("a", &["b"]),
            stub("b", &["c"]),
            stub("c", &["a"]),
            stub("user", &["a"]),
            stub("free", &[]),
        ]);

        assert_eq!(resolution.order(), vec!["free"]);
        assert_eq!(
            resolution.removal_reason("user"),
            Some(&RemovalReason::MissingDependencies {
                missing: vec!["a".to_string()]
            })
        );
        assert!(matches!(
            resolution.removal_reason("c"),
            Some(RemovalReason::Cycle { members }) if members.len() == 3
        ));
    }

    #[test]
    fn test_duplicates_are_all_dropped() {
        let resolution = resolve(vec![
            stub("dup", &[]),
            stub("dup", &[]),
            stub("needs_dup", &["dup"]),
            stub("solo", &[]),
        ]);

        assert_eq!(resolution.order(), vec!["solo"]);
        let duplicates = resolution
            .removed
            .iter()
            .filter(|r| r.reason == RemovalReason::DuplicateId)
            .count();
        assert_eq!(duplicates, 2);
        assert!(matches!(
            resolution.removal_reason("needs_dup"),
            Some(RemovalReason::MissingDependencies { .. })
        ));
    }

    #[test]
    fn test_dependencies_precede_dependents_in_diamond() {
        let resolution = resolve(vec![
            stub("app", &["net", "gfx"]),
            stub("gfx", &["base"]),
            stub("net", &["base"]),
            stub("base", &[]),
            stub("tools", &[]),
        ]);

        let order = resolution.order();
        assert_eq!(order.len(), 5);
        for record in &resolution.ordered {
            for dep in &record.manifest.dependencies {
                assert!(position(&order, dep) < position(&order, record.id()));
            }
        }
        assert_eq!(order, vec!["base", "gfx", "net", "app", "tools"]);
    }

    #[test]
    fn test_unconstrained_bundles_keep_id_order() {
        // `hub` lists its dependencies in reverse id order; that must not
        // reorder `alpha` and `beta` relative to each other.
        let resolution = resolve(vec![
            stub("hub", &["beta", "alpha"]),
            stub("beta", &["root"]),
            stub("alpha", &["root"]),
            stub("root", &[]),
        ]);

        assert_eq!(resolution.order(), vec!["root", "alpha", "beta", "hub"]);
    }

    #[test]
    fn test_repeated_dependency_counts_once() {
        let resolution = resolve(vec![stub("b", &["a", "a"]), stub("a", &[])]);
        assert_eq!(resolution.order(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_dependencies_listed_once() {
        let resolution = resolve(vec![stub("a", &["x", "y", "x"])]);
        assert_eq!(
            resolution.removal_reason("a"),
            Some(&RemovalReason::MissingDependencies {
                missing: vec!["x".to_string(), "y".to_string()]
            })
        );
    }

    #[test]
    fn test_empty_input() {
        let resolution: Resolution<Stub> = resolve(Vec::new());
        assert!(resolution.ordered.is_empty());
        assert!(resolution.removed.is_empty());
    }
}

//! Task dependency graph for a plan.
//!
//! The graph is rebuilt from the plan's task list on every query and used to:
//! - validate dependency integrity (duplicate sequences, missing targets),
//! - compute a deterministic topological execution order,
//! - name the offending cycle when the plan cannot be ordered.
//!
//! Ties between tasks that become ready at the same time are broken by
//! ascending `sequence`, so the same task list always yields the same order.

use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;

use crate::task::Task;

/// Structural problems in a plan's task graph or in a proposal for one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("dependency cycle detected: {}", render_cycle(.cycle))]
    CyclicDependency { cycle: Vec<usize> },
    #[error("task #{task} depends on missing task #{dependency}")]
    MissingDependency { task: usize, dependency: usize },
    #[error("duplicate task sequence in plan: #{0}")]
    DuplicateSequence(usize),
    #[error("malformed plan proposal: {0}")]
    MalformedProposal(String),
}

fn render_cycle(cycle: &[usize]) -> String {
    cycle
        .iter()
        .map(|seq| format!("#{seq}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    dependencies: BTreeMap<usize, Vec<usize>>,
    dependents: BTreeMap<usize, Vec<usize>>,
}

impl TaskGraph {
    /// Build the graph from a plan's tasks, keyed by `sequence`.
    pub fn from_tasks(tasks: &[Task]) -> Result<Self, PlanError> {
        let mut dependencies = BTreeMap::new();
        for task in tasks {
            let mut deps = task.dependencies.clone();
            deps.sort_unstable();
            deps.dedup();
            if dependencies.insert(task.sequence, deps).is_some() {
                return Err(PlanError::DuplicateSequence(task.sequence));
            }
        }

        let mut dependents: BTreeMap<usize, Vec<usize>> =
            dependencies.keys().map(|seq| (*seq, Vec::new())).collect();
        for (seq, deps) in &dependencies {
            for dep in deps {
                match dependents.get_mut(dep) {
                    Some(list) => list.push(*seq),
                    None => {
                        return Err(PlanError::MissingDependency {
                            task: *seq,
                            dependency: *dep,
                        });
                    }
                }
            }
        }
        for list in dependents.values_mut() {
            list.sort_unstable();
        }

        Ok(Self {
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Return a deterministic topological sort of all task sequences.
    ///
    /// Fails with [`PlanError::CyclicDependency`] when some tasks can never
    /// become ready; the order is never silently truncated.
    pub fn topological_sort(&self) -> Result<Vec<usize>, PlanError> {
        let mut indegree: BTreeMap<usize, usize> = self
            .dependencies
            .iter()
            .map(|(seq, deps)| (*seq, deps.len()))
            .collect();
        let mut queue: VecDeque<usize> = indegree
            .iter()
            .filter_map(|(seq, degree)| (*degree == 0).then_some(*seq))
            .collect();

        let mut order = Vec::with_capacity(self.dependencies.len());
        while let Some(seq) = queue.pop_front() {
            order.push(seq);
            for dependent in self.dependents.get(&seq).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() != self.dependencies.len() {
            let cycle = self.find_any_cycle().unwrap_or_else(|| {
                indegree
                    .into_iter()
                    .filter_map(|(seq, degree)| (degree > 0).then_some(seq))
                    .collect()
            });
            return Err(PlanError::CyclicDependency { cycle });
        }

        Ok(order)
    }

    fn find_any_cycle(&self) -> Option<Vec<usize>> {
        let mut states: HashMap<usize, VisitState> = HashMap::new();
        let mut path = Vec::new();
        let mut path_index: HashMap<usize, usize> = HashMap::new();

        for seq in self.dependencies.keys() {
            if states.contains_key(seq) {
                continue;
            }
            if let Some(cycle) = self.find_cycle(*seq, &mut states, &mut path, &mut path_index) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle(
        &self,
        seq: usize,
        states: &mut HashMap<usize, VisitState>,
        path: &mut Vec<usize>,
        path_index: &mut HashMap<usize, usize>,
    ) -> Option<Vec<usize>> {
        states.insert(seq, VisitState::Visiting);
        path_index.insert(seq, path.len());
        path.push(seq);

        for dep in self.dependencies.get(&seq).into_iter().flatten() {
            match states.get(dep).copied() {
                None => {
                    if let Some(cycle) = self.find_cycle(*dep, states, path, path_index) {
                        return Some(cycle);
                    }
                }
                Some(VisitState::Visiting) => {
                    let start = path_index.get(dep).copied()?;
                    let mut cycle = path[start..].to_vec();
                    cycle.push(*dep);
                    return Some(cycle);
                }
                Some(VisitState::Visited) => {}
            }
        }

        path.pop();
        path_index.remove(&seq);
        states.insert(seq, VisitState::Visited);
        None
    }
}

/// Order `tasks` so that every task follows all of its dependencies.
pub fn topological_order(tasks: &[Task]) -> Result<Vec<&Task>, PlanError> {
    let graph = TaskGraph::from_tasks(tasks)?;
    let order = graph.topological_sort()?;
    let by_sequence: HashMap<usize, &Task> = tasks.iter().map(|t| (t.sequence, t)).collect();
    Ok(order
        .into_iter()
        .filter_map(|seq| by_sequence.get(&seq).copied())
        .collect())
}

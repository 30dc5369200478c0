use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use kiln_artifact::ArtifactReference;
use kiln_task::TaskKind;
use tracing::{debug, instrument};

use crate::error::{ScheduleError, Violation};
use crate::node::TaskNode;

/// Validates declarations and computes execution order.
///
/// Ordering is a topological sort that breaks ties by registration index, so
/// independent tasks keep the order they were registered in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
  /// Validate and order in one step.
  #[instrument(name = "schedule", skip(nodes), fields(tasks = nodes.len()))]
  pub fn plan(nodes: &[TaskNode]) -> Result<Vec<usize>, ScheduleError> {
    Self::validate(nodes)?;
    let order = Self::order(nodes)?;
    debug!(order = ?order, "schedule_planned");
    Ok(order)
  }

  /// Check every declaration, reporting all violations together.
  ///
  /// Missing tasks are listed first, then missing artifacts, then artifacts
  /// produced by more than one task.
  pub fn validate(nodes: &[TaskNode]) -> Result<(), ScheduleError> {
    let mut missing_tasks = Vec::new();
    let mut missing_artifacts = Vec::new();

    let producers = producers(nodes);

    for node in nodes {
      for kind in &node.required_tasks {
        if !nodes.iter().any(|other| other.satisfies(kind)) {
          missing_tasks.push(Violation::MissingTask {
            task: node.name.clone(),
            kind: kind.clone(),
          });
        }
      }

      for reference in &node.required_artifacts {
        if !producers.contains_key(reference) {
          missing_artifacts.push(Violation::MissingArtifact {
            task: node.name.clone(),
            reference: reference.clone(),
          });
        }
      }
    }

    let conflicts = producers
      .into_iter()
      .filter(|(_, indices)| indices.len() > 1)
      .map(|(reference, indices)| Violation::ConflictingProducers {
        reference: reference.clone(),
        tasks: indices.iter().map(|&i| nodes[i].name.clone()).collect(),
      });

    let violations: Vec<Violation> = missing_tasks
      .into_iter()
      .chain(missing_artifacts)
      .chain(conflicts)
      .collect();

    if violations.is_empty() {
      Ok(())
    } else {
      Err(ScheduleError::Validation { violations })
    }
  }

  /// Compute the execution order as indices into `nodes`.
  ///
  /// Required edges are fixed; a cycle among them is an error. Optional
  /// edges are then added one at a time and only an edge that would close a
  /// cycle is dropped.
  pub fn order(nodes: &[TaskNode]) -> Result<Vec<usize>, ScheduleError> {
    let mut predecessors = required_edges(nodes);
    topological_sort(&predecessors).map_err(|stuck| ScheduleError::Cycle {
      tasks: stuck.into_iter().map(|i| nodes[i].name.clone()).collect(),
    })?;

    for (index, pred) in optional_edges(nodes) {
      if predecessors[index].contains(&pred) {
        continue;
      }
      if depends_on(&predecessors, pred, index) {
        debug!(
          task = %nodes[index].name,
          after = %nodes[pred].name,
          "optional_dependency_dropped"
        );
        continue;
      }
      predecessors[index].insert(pred);
    }

    topological_sort(&predecessors).map_err(|stuck| ScheduleError::Cycle {
      tasks: stuck.into_iter().map(|i| nodes[i].name.clone()).collect(),
    })
  }
}

fn producers(nodes: &[TaskNode]) -> BTreeMap<&ArtifactReference, Vec<usize>> {
  let mut producers: BTreeMap<&ArtifactReference, Vec<usize>> = BTreeMap::new();
  for (index, node) in nodes.iter().enumerate() {
    for reference in &node.produced_artifacts {
      producers.entry(reference).or_default().push(index);
    }
  }
  producers
}

/// Predecessors of each node through required tasks and artifacts.
/// Self-edges are ignored.
fn required_edges(nodes: &[TaskNode]) -> Vec<BTreeSet<usize>> {
  let producers = producers(nodes);
  let mut predecessors = vec![BTreeSet::new(); nodes.len()];

  for (index, node) in nodes.iter().enumerate() {
    for kind in &node.required_tasks {
      predecessors[index].extend(satisfying(nodes, index, kind));
    }

    let artifacts = node
      .required_artifacts
      .iter()
      .chain(&node.consumed_artifacts);
    for reference in artifacts {
      if let Some(sources) = producers.get(reference) {
        predecessors[index].extend(sources.iter().copied().filter(|&i| i != index));
      }
    }
  }

  predecessors
}

/// `(task, predecessor)` pairs from optional-task declarations, in
/// registration order.
fn optional_edges(nodes: &[TaskNode]) -> Vec<(usize, usize)> {
  let mut edges = Vec::new();
  for (index, node) in nodes.iter().enumerate() {
    let preds: BTreeSet<usize> = node
      .optional_tasks
      .iter()
      .flat_map(|kind| satisfying(nodes, index, kind))
      .collect();
    edges.extend(preds.into_iter().map(|pred| (index, pred)));
  }
  edges
}

fn satisfying<'a>(
  nodes: &'a [TaskNode],
  index: usize,
  kind: &'a TaskKind,
) -> impl Iterator<Item = usize> + 'a {
  nodes
    .iter()
    .enumerate()
    .filter(move |(other, candidate)| *other != index && candidate.satisfies(kind))
    .map(|(other, _)| other)
}

/// True when `task` already has to wait for `target`, directly or not.
fn depends_on(predecessors: &[BTreeSet<usize>], task: usize, target: usize) -> bool {
  let mut seen = vec![false; predecessors.len()];
  let mut stack = vec![task];
  while let Some(current) = stack.pop() {
    if current == target {
      return true;
    }
    if std::mem::replace(&mut seen[current], true) {
      continue;
    }
    stack.extend(predecessors[current].iter().copied());
  }
  false
}

/// Kahn's algorithm, always taking the lowest ready index.
///
/// On failure returns the indices that could not be scheduled.
fn topological_sort(predecessors: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
  let count = predecessors.len();
  let mut successors = vec![Vec::new(); count];
  let mut in_degree = vec![0usize; count];

  for (index, preds) in predecessors.iter().enumerate() {
    in_degree[index] = preds.len();
    for &pred in preds {
      successors[pred].push(index);
    }
  }

  let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
    .filter(|&i| in_degree[i] == 0)
    .map(Reverse)
    .collect();
  let mut order = Vec::with_capacity(count);

  while let Some(Reverse(index)) = ready.pop() {
    order.push(index);
    for &next in &successors[index] {
      in_degree[next] -= 1;
      if in_degree[next] == 0 {
        ready.push(Reverse(next));
      }
    }
  }

  if order.len() == count {
    Ok(order)
  } else {
    Err((0..count).filter(|&i| in_degree[i] > 0).collect())
  }
}

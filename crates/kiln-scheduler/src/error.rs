use std::fmt;

use kiln_artifact::ArtifactReference;
use kiln_task::TaskKind;
use thiserror::Error;

/// A single unsatisfiable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
  /// A task requires a kind no registered task satisfies.
  MissingTask { task: String, kind: TaskKind },

  /// A task requires an artifact no registered task produces.
  MissingArtifact {
    task: String,
    reference: ArtifactReference,
  },

  /// More than one task produces the same artifact.
  ConflictingProducers {
    reference: ArtifactReference,
    tasks: Vec<String>,
  },
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Violation::MissingTask { task, kind } => {
        write!(f, "task '{}' requires missing task '{}'", task, kind)
      }
      Violation::MissingArtifact { task, reference } => {
        write!(
          f,
          "task '{}' requires artifact {} which no task produces",
          task, reference
        )
      }
      Violation::ConflictingProducers { reference, tasks } => {
        write!(
          f,
          "artifact {} is provided by {}",
          reference,
          tasks.join(", ")
        )
      }
    }
  }
}

/// Errors raised while validating or ordering a pipeline.
#[derive(Debug, Error)]
pub enum ScheduleError {
  /// One or more declarations cannot be satisfied.
  #[error("unsatisfied task dependencies: {}", render(.violations))]
  Validation { violations: Vec<Violation> },

  /// Required dependencies form a cycle.
  #[error("dependency cycle between tasks: {}", .tasks.join(", "))]
  Cycle { tasks: Vec<String> },
}

impl ScheduleError {
  pub fn violations(&self) -> &[Violation] {
    match self {
      ScheduleError::Validation { violations } => violations,
      ScheduleError::Cycle { .. } => &[],
    }
  }
}

fn render(violations: &[Violation]) -> String {
  violations
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

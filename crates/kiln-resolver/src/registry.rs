use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_config::TaskDef;
use kiln_task::{Task, TaskKind};

use crate::error::ResolveError;

/// Builds tasks of one kind from their definitions.
pub trait TaskFactory: Send + Sync {
  fn kind(&self) -> TaskKind;

  /// One-line summary shown when listing task kinds.
  fn description(&self) -> &str {
    ""
  }

  /// Build a task from the definition's options.
  fn create(&self, def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError>;
}

/// Factories keyed by the kind they build.
#[derive(Default, Clone)]
pub struct TaskRegistry {
  factories: BTreeMap<String, Arc<dyn TaskFactory>>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a factory, replacing any previous one for the same kind.
  pub fn register(&mut self, factory: impl TaskFactory + 'static) -> &mut Self {
    self
      .factories
      .insert(factory.kind().to_string(), Arc::new(factory));
    self
  }

  pub fn get(&self, kind: &str) -> Option<&Arc<dyn TaskFactory>> {
    self.factories.get(kind)
  }

  /// Registered factories in kind order.
  pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn TaskFactory>> {
    self.factories.values()
  }

  pub fn len(&self) -> usize {
    self.factories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.factories.is_empty()
  }
}

impl std::fmt::Debug for TaskRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskRegistry")
      .field("kinds", &self.factories.keys().collect::<Vec<_>>())
      .finish()
  }
}

//! Execution events and notifiers for observability.
//!
//! Events are emitted while a pipeline runs so consumers can follow progress,
//! persist run history or stream it elsewhere.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// Pipeline execution has started.
  PipelineStarted {
    execution_id: String,
    tasks: Vec<String>,
  },

  /// A task invocation has started.
  TaskStarted { execution_id: String, task: String },

  /// A task was skipped because its output artifact is still valid.
  TaskSkipped {
    execution_id: String,
    task: String,
    artifact: String,
  },

  /// A task has completed successfully.
  TaskCompleted { execution_id: String, task: String },

  /// A task has failed.
  TaskFailed {
    execution_id: String,
    task: String,
    error: String,
  },

  /// Every task completed or was skipped.
  PipelineCompleted { execution_id: String },

  /// The pipeline was aborted.
  PipelineFailed { execution_id: String, error: String },
}

/// Receives execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
///
/// The channel is unbounded so a slow consumer never stalls the engine; a
/// run emits a handful of events per task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

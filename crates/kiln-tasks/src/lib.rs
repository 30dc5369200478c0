//! Built-in kiln tasks.
//!
//! | kind             | input    | output   | does                                   |
//! |------------------|----------|----------|----------------------------------------|
//! | `copy`           | required | required | copies a file or directory             |
//! | `command`        | optional | optional | runs a program                         |
//! | `create-archive` | required | required | writes a `.tar.gz` of the input        |
//! | `download`       | -        | required | fetches a URL                          |
//! | `git-*`          | required | varies   | drives the `git` executable            |
//!
//! Each kind comes with a [`TaskFactory`](kiln_resolver::TaskFactory) that
//! reads the task's `options` from its definition.

mod archive;
mod command;
mod copy;
mod download;
mod fs;
mod git;
mod options;

pub use archive::{CreateArchiveFactory, CreateArchiveOptions, CreateArchiveTask};
pub use command::{CommandFactory, CommandOptions, CommandTask};
pub use copy::{CopyFactory, CopyTask};
pub use download::{DownloadFactory, DownloadFileTask, DownloadOptions};
pub use git::{GitFactory, GitOperation, GitOptions, GitTask, Identity};

use kiln_resolver::TaskRegistry;

/// Add every built-in factory to `registry`.
pub fn register_builtin(registry: &mut TaskRegistry) -> &mut TaskRegistry {
  registry
    .register(CopyFactory)
    .register(CommandFactory)
    .register(CreateArchiveFactory)
    .register(DownloadFactory);
  for factory in GitFactory::all() {
    registry.register(factory);
  }
  registry
}

/// A registry holding only the built-in factories.
pub fn builtin_registry() -> TaskRegistry {
  let mut registry = TaskRegistry::new();
  register_builtin(&mut registry);
  registry
}

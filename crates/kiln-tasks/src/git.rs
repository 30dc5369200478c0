//! Tasks driving the `git` executable against a working tree.
//!
//! Every task works on the repository at its input path, except `git-am`
//! which applies the patches found at its input to the repository at its
//! output.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_config::TaskDef;
use kiln_resolver::{ResolveError, TaskFactory};
use kiln_task::{Context, Task, TaskError, TaskKind};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::command::{run, supervise};
use crate::options;

const INIT: TaskKind = TaskKind::from_static("git-init");
const ADD: TaskKind = TaskKind::from_static("git-add");
const COMMIT: TaskKind = TaskKind::from_static("git-commit");
const CREATE_BRANCH: TaskKind = TaskKind::from_static("git-create-branch");
const FORMAT_PATCH: TaskKind = TaskKind::from_static("git-format-patch");
const APPLY_MAIL_ARCHIVE: TaskKind = TaskKind::from_static("git-am");

const PROGRAM: &str = "git";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Author and committer recorded by commits and applied patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub name: String,
  pub email: String,
}

/// Settings shared by the git task kinds. Which fields a kind needs is
/// checked when the task is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitOptions {
  /// Pathspecs for `git-add`; everything when empty.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub paths: Vec<String>,

  /// Commit message for `git-commit`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,

  /// Branch created by `git-create-branch`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,

  /// Branch patches are generated against, or reset to before applying them.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reference_branch: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub identity: Option<Identity>,

  /// Limit for each git invocation. Five minutes when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitOperation {
  Init,
  Add { paths: Vec<String> },
  Commit { message: String },
  CreateBranch { name: String },
  FormatPatch { reference_branch: String },
  ApplyMailArchive { reference_branch: Option<String> },
}

impl GitOperation {
  pub fn kind(&self) -> TaskKind {
    match self {
      Self::Init => INIT,
      Self::Add { .. } => ADD,
      Self::Commit { .. } => COMMIT,
      Self::CreateBranch { .. } => CREATE_BRANCH,
      Self::FormatPatch { .. } => FORMAT_PATCH,
      Self::ApplyMailArchive { .. } => APPLY_MAIL_ARCHIVE,
    }
  }
}

/// Runs one git operation.
#[derive(Debug, Clone)]
pub struct GitTask {
  operation: GitOperation,
  identity: Option<Identity>,
  timeout: Duration,
}

impl GitTask {
  pub fn new(operation: GitOperation) -> Self {
    Self {
      operation,
      identity: None,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
  }

  pub fn with_identity(mut self, identity: Identity) -> Self {
    self.identity = Some(identity);
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn operation(&self) -> &GitOperation {
    &self.operation
  }

  fn git<'a>(&'a self, work_tree: &'a Path) -> Git<'a> {
    Git {
      work_tree,
      identity: self.identity.as_ref(),
      timeout: self.timeout,
    }
  }
}

#[async_trait]
impl Task for GitTask {
  fn kind(&self) -> TaskKind {
    self.operation.kind()
  }

  fn requires_input(&self) -> bool {
    true
  }

  fn requires_output(&self) -> bool {
    matches!(
      self.operation,
      GitOperation::FormatPatch { .. } | GitOperation::ApplyMailArchive { .. }
    )
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    let input = context.required_input_path()?.to_path_buf();

    match &self.operation {
      GitOperation::Init => init(self.git(&input)).await,
      GitOperation::Add { paths } => {
        let git = self.git(&input);
        git.require_repository().await?;
        let mut args = vec!["add", "--"];
        if paths.is_empty() {
          args.push(".");
        } else {
          args.extend(paths.iter().map(String::as_str));
        }
        git.succeed(args, "failed to add files").await
      }
      GitOperation::Commit { message } => {
        let git = self.git(&input);
        git.require_repository().await?;
        git
          .succeed(["commit", "--quiet", "-m", message.as_str()], "failed to commit")
          .await
      }
      GitOperation::CreateBranch { name } => create_branch(self.git(&input), name).await,
      GitOperation::FormatPatch { reference_branch } => {
        let output = absolute(context.required_output_path()?)?;
        format_patch(self.git(&input), reference_branch, &output).await
      }
      GitOperation::ApplyMailArchive { reference_branch } => {
        let output = context.required_output_path()?.to_path_buf();
        let patches = absolute(&input)?;
        apply_mail_archive(self.git(&output), reference_branch.as_deref(), &patches).await
      }
    }
  }
}

/// A git invocation context rooted at a working tree.
struct Git<'a> {
  work_tree: &'a Path,
  identity: Option<&'a Identity>,
  timeout: Duration,
}

impl Git<'_> {
  async fn status<I, S>(&self, args: I) -> Result<ExitStatus, TaskError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let mut command = Command::new(PROGRAM);
    command.args(args).current_dir(self.work_tree);
    if let Some(identity) = self.identity {
      command
        .env("GIT_AUTHOR_NAME", &identity.name)
        .env("GIT_AUTHOR_EMAIL", &identity.email)
        .env("GIT_COMMITTER_NAME", &identity.name)
        .env("GIT_COMMITTER_EMAIL", &identity.email);
    }
    supervise(&mut command);
    run(&mut command, PROGRAM, Some(self.timeout)).await
  }

  async fn succeed<I, S>(&self, args: I, failure: &str) -> Result<(), TaskError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let status = self.status(args).await?;
    if status.success() {
      Ok(())
    } else {
      Err(TaskError::execution(format!(
        "{}: git exited with {}",
        failure, status
      )))
    }
  }

  async fn has_repository(&self) -> bool {
    tokio::fs::try_exists(self.work_tree.join(".git"))
      .await
      .unwrap_or(false)
  }

  async fn require_repository(&self) -> Result<(), TaskError> {
    if self.has_repository().await {
      Ok(())
    } else {
      Err(TaskError::execution(format!(
        "no repository at {}",
        self.work_tree.display()
      )))
    }
  }
}

async fn init(git: Git<'_>) -> Result<(), TaskError> {
  if git.has_repository().await {
    info!(path = %git.work_tree.display(), "repository_exists");
    return Ok(());
  }
  tokio::fs::create_dir_all(git.work_tree)
    .await
    .map_err(|e| TaskError::caused_by(format!("cannot create {}", git.work_tree.display()), e))?;
  git
    .succeed(["init", "--quiet"], "failed to create repository")
    .await
}

async fn create_branch(git: Git<'_>, name: &str) -> Result<(), TaskError> {
  git.require_repository().await?;
  let reference = format!("refs/heads/{}", name);
  let exists = git
    .status(["rev-parse", "--verify", "--quiet", reference.as_str()])
    .await?
    .success();
  if exists {
    info!(branch = %name, "branch_exists");
    return Ok(());
  }
  git.succeed(["branch", name], "failed to create branch").await?;
  info!(branch = %name, "branch_created");
  Ok(())
}

async fn format_patch(git: Git<'_>, reference_branch: &str, output: &Path) -> Result<(), TaskError> {
  git.require_repository().await?;
  let clean = git.status(["diff", "--quiet", "HEAD"]).await?.success();
  if !clean {
    warn!(path = %git.work_tree.display(), "uncommitted_changes_omitted");
  }

  info!(reference = %reference_branch, "generating_patches");
  let output = output.as_os_str();
  git
    .succeed(
      [
        OsStr::new("format-patch"),
        OsStr::new("-p"),
        OsStr::new("--minimal"),
        OsStr::new("-N"),
        OsStr::new("--quiet"),
        OsStr::new("-o"),
        output,
        OsStr::new(reference_branch),
      ],
      "failed to generate patches",
    )
    .await
}

async fn apply_mail_archive(
  git: Git<'_>,
  reference_branch: Option<&str>,
  patches: &Path,
) -> Result<(), TaskError> {
  git.require_repository().await?;

  // Leftovers of an interrupted run; failing here only means none was
  // in progress.
  if git.status(["am", "--abort"]).await?.success() {
    warn!("mail_archive_merge_aborted");
  }
  if git.status(["merge", "--abort"]).await?.success() {
    warn!("merge_aborted");
  }

  if let Some(reference) = reference_branch {
    git
      .succeed(
        ["reset", "--quiet", "--hard", reference],
        "failed to revert to reference branch",
      )
      .await?;
  }

  if !tokio::fs::try_exists(patches).await.unwrap_or(false) {
    warn!(path = %patches.display(), "patch_directory_missing");
    return Ok(());
  }

  for patch in patch_files(patches).await? {
    info!(patch = %patch.display(), "applying_patch");
    git
      .succeed(
        [
          OsStr::new("am"),
          OsStr::new("--quiet"),
          OsStr::new("--ignore-whitespace"),
          OsStr::new("--3way"),
          patch.as_os_str(),
        ],
        "failed to apply patch",
      )
      .await?;
  }
  Ok(())
}

/// Patch files in `dir`, ordered by their numeric prefix.
async fn patch_files(dir: &Path) -> Result<Vec<PathBuf>, TaskError> {
  let read_error = |e: std::io::Error| TaskError::caused_by(format!("cannot read {}", dir.display()), e);

  let mut patches = Vec::new();
  let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
  while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
    let name = entry.file_name();
    if let Some(sequence) = name.to_str().and_then(patch_sequence) {
      patches.push((sequence, entry.path()));
    }
  }

  patches.sort();
  Ok(patches.into_iter().map(|(_, path)| path).collect())
}

/// Sequence number of a `NNNN-subject` patch name. At least four digits.
fn patch_sequence(name: &str) -> Option<u64> {
  let (digits, subject) = name.split_once('-')?;
  let valid_subject = !subject.is_empty()
    && subject
      .chars()
      .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'));
  if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) || !valid_subject {
    return None;
  }
  digits.parse().ok()
}

fn absolute(path: &Path) -> Result<PathBuf, TaskError> {
  std::path::absolute(path)
    .map_err(|e| TaskError::caused_by(format!("invalid path {}", path.display()), e))
}

/// Creates one of the git task kinds.
pub struct GitFactory {
  kind: TaskKind,
  description: &'static str,
  operation: fn(GitOptions) -> Result<GitOperation, &'static str>,
}

impl GitFactory {
  /// A factory for every git task kind.
  pub fn all() -> [GitFactory; 6] {
    [
      GitFactory {
        kind: INIT,
        description: "Create a git repository at the input unless one exists",
        operation: |_| Ok(GitOperation::Init),
      },
      GitFactory {
        kind: ADD,
        description: "Stage files of the repository at the input",
        operation: |options| Ok(GitOperation::Add {
          paths: options.paths,
        }),
      },
      GitFactory {
        kind: COMMIT,
        description: "Commit staged changes of the repository at the input",
        operation: |options| match options.message {
          Some(message) if !message.trim().is_empty() => Ok(GitOperation::Commit { message }),
          _ => Err("message is required"),
        },
      },
      GitFactory {
        kind: CREATE_BRANCH,
        description: "Create a branch in the repository at the input unless it exists",
        operation: |options| match options.branch {
          Some(name) if !name.is_empty() => Ok(GitOperation::CreateBranch { name }),
          _ => Err("branch is required"),
        },
      },
      GitFactory {
        kind: FORMAT_PATCH,
        description: "Write patches since a reference branch to the output",
        operation: |options| match options.reference_branch {
          Some(reference_branch) if !reference_branch.is_empty() => {
            Ok(GitOperation::FormatPatch { reference_branch })
          }
          _ => Err("reference_branch is required"),
        },
      },
      GitFactory {
        kind: APPLY_MAIL_ARCHIVE,
        description: "Apply the patches at the input to the repository at the output",
        operation: |options| {
          Ok(GitOperation::ApplyMailArchive {
            reference_branch: options.reference_branch,
          })
        },
      },
    ]
  }
}

impl TaskFactory for GitFactory {
  fn kind(&self) -> TaskKind {
    self.kind.clone()
  }

  fn description(&self) -> &str {
    self.description
  }

  fn create(&self, def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError> {
    let options: GitOptions = options::parse(def)?;
    let identity = options.identity.clone();
    let timeout = options.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

    let operation = (self.operation)(options)
      .map_err(|message| ResolveError::invalid_options(def.display_name(), message))?;

    let mut task = GitTask::new(operation).with_timeout(Duration::from_secs(timeout));
    if let Some(identity) = identity {
      task = task.with_identity(identity);
    }
    Ok(Arc::new(task))
  }
}

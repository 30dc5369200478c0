use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_config::TaskDef;
use kiln_resolver::{ResolveError, TaskFactory};
use kiln_task::{Context, Task, TaskError, TaskKind};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::options;

const KIND: TaskKind = TaskKind::from_static("command");

/// How long to keep draining output once the program is done. Background
/// children may hold the pipes open long after it exits.
const RELAY_GRACE: Duration = Duration::from_secs(2);

/// Settings of a `command` task.
///
/// `program`, `args`, `env` values and `working_dir` may contain the
/// placeholders `{input}`, `{output}` and `{param:NAME}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOptions {
  pub program: String,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub working_dir: Option<String>,

  /// Exit codes treated as success.
  #[serde(default = "default_exit_codes")]
  pub exit_codes: Vec<i32>,

  /// Kill the program after this many seconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,

  /// Parameters the registration may bind.
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub parameters: BTreeSet<String>,

  #[serde(default)]
  pub requires_input: bool,

  #[serde(default)]
  pub requires_output: bool,
}

fn default_exit_codes() -> Vec<i32> {
  vec![0]
}

impl CommandOptions {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      working_dir: None,
      exit_codes: default_exit_codes(),
      timeout_secs: None,
      parameters: BTreeSet::new(),
      requires_input: false,
      requires_output: false,
    }
  }
}

/// Runs an external program.
///
/// Output is relayed to the log line by line. The program is killed when
/// the timeout elapses or the invocation is dropped. On unix it runs in its
/// own process group and a timeout kills the whole group.
#[derive(Debug, Clone)]
pub struct CommandTask {
  options: CommandOptions,
}

impl CommandTask {
  pub fn new(options: CommandOptions) -> Self {
    Self { options }
  }

  pub fn options(&self) -> &CommandOptions {
    &self.options
  }

  fn command(&self, context: &Context) -> Result<Command, TaskError> {
    let program = expand(&self.options.program, context)?;
    let mut command = Command::new(&program);

    for arg in &self.options.args {
      command.arg(expand(arg, context)?);
    }
    for (key, value) in &self.options.env {
      command.env(key, expand(value, context)?);
    }
    if let Some(dir) = &self.options.working_dir {
      command.current_dir(PathBuf::from(expand(dir, context)?));
    }

    supervise(&mut command);
    Ok(command)
  }
}

/// Pipe output for relaying and tie the program's lifetime to ours.
pub(crate) fn supervise(command: &mut Command) {
  command
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);
}

/// Spawn a [`supervise`]d command, relay its output and wait for it.
///
/// When `timeout` elapses the program and everything it started is killed
/// and an execution error is returned.
pub(crate) async fn run(
  command: &mut Command,
  program: &str,
  timeout: Option<Duration>,
) -> Result<ExitStatus, TaskError> {
  debug!(program = %program, "spawning");
  let mut child = command
    .spawn()
    .map_err(|e| TaskError::caused_by(format!("failed to start {}", program), e))?;
  let pid = child.id();

  let mut relays = Vec::new();
  if let Some(stdout) = child.stdout.take() {
    relays.push(relay(stdout, Stream::Stdout));
  }
  if let Some(stderr) = child.stderr.take() {
    relays.push(relay(stderr, Stream::Stderr));
  }

  let waited = match timeout {
    None => Some(child.wait().await),
    Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
  };

  let Some(status) = waited else {
    kill_group(pid, program);
    if let Err(e) = child.kill().await {
      debug!(program = %program, error = %e, "kill_failed");
    }
    join(relays).await;
    return Err(TaskError::execution(format!(
      "{} timed out after {}s",
      program,
      timeout.unwrap_or_default().as_secs()
    )));
  };
  join(relays).await;

  status.map_err(|e| TaskError::caused_by(format!("failed to wait for {}", program), e))
}

#[async_trait]
impl Task for CommandTask {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn requires_input(&self) -> bool {
    self.options.requires_input
  }

  fn requires_output(&self) -> bool {
    self.options.requires_output
  }

  fn available_parameters(&self) -> BTreeSet<String> {
    self.options.parameters.clone()
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    let program = &self.options.program;
    let mut command = self.command(context)?;
    let timeout = self.options.timeout_secs.map(Duration::from_secs);
    let status = run(&mut command, program, timeout).await?;

    match status.code() {
      Some(code) if self.options.exit_codes.contains(&code) => Ok(()),
      Some(code) => Err(TaskError::execution(format!(
        "{}: expected exit code {} but got {}",
        program,
        render_codes(&self.options.exit_codes),
        code
      ))),
      None => Err(TaskError::execution(format!(
        "{} was terminated by a signal",
        program
      ))),
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
  Stdout,
  Stderr,
}

fn relay<R>(reader: R, stream: Stream) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut lines = BufReader::new(reader).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => match stream {
          Stream::Stdout => info!(stream = "stdout", "{}", line),
          Stream::Stderr => warn!(stream = "stderr", "{}", line),
        },
        Ok(None) => break,
        Err(e) => {
          warn!(?stream, error = %e, "relay_failed");
          break;
        }
      }
    }
  })
}

/// Wait for the relays to drain, giving up after [`RELAY_GRACE`].
async fn join(relays: Vec<JoinHandle<()>>) {
  let deadline = tokio::time::Instant::now() + RELAY_GRACE;
  for mut handle in relays {
    match tokio::time::timeout_at(deadline, &mut handle).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "relay_panicked"),
      Err(_) => {
        debug!("relay_abandoned");
        handle.abort();
      }
    }
  }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>, program: &str) {
  use nix::sys::signal::{Signal, killpg};
  use nix::unistd::Pid;

  let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
    return;
  };
  if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
    debug!(program = %program, error = %e, "kill_group_failed");
  }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>, _program: &str) {}

fn render_codes(codes: &[i32]) -> String {
  codes
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(" or ")
}

/// Substitute `{input}`, `{output}` and `{param:NAME}`. Any other braces
/// are left as they are.
pub(crate) fn expand(template: &str, context: &Context) -> Result<String, TaskError> {
  let mut expanded = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find('{') {
    expanded.push_str(&rest[..start]);
    let after = &rest[start + 1..];
    let Some(end) = after.find('}') else {
      expanded.push_str(&rest[start..]);
      return Ok(expanded);
    };

    let key = &after[..end];
    let value = if key == "input" {
      Some(context.required_input_path()?)
    } else if key == "output" {
      Some(context.required_output_path()?)
    } else if let Some(name) = key.strip_prefix("param:") {
      Some(context.required_parameter_path(name)?)
    } else {
      None
    };

    match value {
      Some(path) => expanded.push_str(&path.to_string_lossy()),
      None => {
        expanded.push('{');
        expanded.push_str(key);
        expanded.push('}');
      }
    }
    rest = &after[end + 1..];
  }

  expanded.push_str(rest);
  Ok(expanded)
}

pub struct CommandFactory;

impl TaskFactory for CommandFactory {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn description(&self) -> &str {
    "Run a program with the input, output and parameter paths substituted"
  }

  fn create(&self, def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError> {
    let options: CommandOptions = options::parse_required(def)?;
    if options.exit_codes.is_empty() {
      return Err(ResolveError::invalid_options(
        def.display_name(),
        "exit_codes must not be empty",
      ));
    }
    Ok(Arc::new(CommandTask::new(options)))
  }
}

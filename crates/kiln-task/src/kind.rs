use std::borrow::Cow;
use std::fmt;

/// Stable identifier of a kind of task.
///
/// Required and optional task declarations name kinds rather than
/// registrations, so any registered task satisfying the kind fulfils them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKind(Cow<'static, str>);

impl TaskKind {
  pub const fn from_static(kind: &'static str) -> Self {
    Self(Cow::Borrowed(kind))
  }

  pub fn new(kind: impl Into<String>) -> Self {
    Self(Cow::Owned(kind.into()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&'static str> for TaskKind {
  fn from(kind: &'static str) -> Self {
    Self::from_static(kind)
  }
}

impl From<String> for TaskKind {
  fn from(kind: String) -> Self {
    Self::new(kind)
  }
}

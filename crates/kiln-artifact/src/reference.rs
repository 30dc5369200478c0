use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Identity of an artifact.
///
/// Two references are equal only when every field matches. The `name` may be
/// namespaced as `group/artifact` (for example `org.example/widget`), which the
/// repository cache uses to build its directory hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactReference {
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  classifier: Option<String>,
  version: String,
  extension: String,
}

impl ArtifactReference {
  pub fn new(
    name: impl Into<String>,
    version: impl Into<String>,
    extension: impl Into<String>,
  ) -> Self {
    Self {
      name: name.into(),
      classifier: None,
      version: version.into(),
      extension: extension.into(),
    }
  }

  pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
    self.classifier = Some(classifier.into());
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn classifier(&self) -> Option<&str> {
    self.classifier.as_deref()
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn extension(&self) -> &str {
    &self.extension
  }

  /// The namespace part of a `group/artifact` name, if any.
  pub fn group(&self) -> Option<&str> {
    self.name.rsplit_once('/').map(|(group, _)| group)
  }

  /// The name without its namespace.
  pub fn artifact_id(&self) -> &str {
    self
      .name
      .rsplit_once('/')
      .map_or(self.name.as_str(), |(_, id)| id)
  }

  /// Canonical `name:version[:classifier]:extension` form.
  pub fn identifier(&self) -> String {
    self.to_string()
  }

  /// File name used for this artifact in a single directory:
  /// `{artifact}-{version}[-{classifier}].{extension}`.
  pub fn file_name(&self) -> String {
    match &self.classifier {
      Some(classifier) => format!(
        "{}-{}-{}.{}",
        self.artifact_id(),
        self.version,
        classifier,
        self.extension
      ),
      None => format!("{}-{}.{}", self.artifact_id(), self.version, self.extension),
    }
  }
}

impl fmt::Display for ArtifactReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.name, self.version)?;
    if let Some(classifier) = &self.classifier {
      write!(f, ":{}", classifier)?;
    }
    write!(f, ":{}", self.extension)
  }
}

impl FromStr for ArtifactReference {
  type Err = ArtifactError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.iter().any(|part| part.trim().is_empty()) {
      return Err(ArtifactError::invalid_reference(value, "empty segment"));
    }

    match parts.as_slice() {
      [name, version, extension] => Ok(Self::new(*name, *version, *extension)),
      [name, version, classifier, extension] => {
        Ok(Self::new(*name, *version, *extension).with_classifier(*classifier))
      }
      _ => Err(ArtifactError::invalid_reference(
        value,
        "expected name:version[:classifier]:extension",
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equality_covers_every_field() {
    let base = ArtifactReference::new("widget", "1.0", "jar");
    assert_eq!(base, ArtifactReference::new("widget", "1.0", "jar"));
    assert_ne!(base, ArtifactReference::new("widget", "1.1", "jar"));
    assert_ne!(base, ArtifactReference::new("widget", "1.0", "zip"));
    assert_ne!(base, base.clone().with_classifier("sources"));
  }

  #[test]
  fn parse_and_display() {
    let reference: ArtifactReference = "org.example/widget:1.0:sources:jar"
      .parse()
      .expect("should parse");
    assert_eq!(reference.name(), "org.example/widget");
    assert_eq!(reference.classifier(), Some("sources"));
    assert_eq!(reference.group(), Some("org.example"));
    assert_eq!(reference.artifact_id(), "widget");
    assert_eq!(reference.to_string(), "org.example/widget:1.0:sources:jar");

    let plain: ArtifactReference = "widget:1.0:tar.gz".parse().expect("should parse");
    assert_eq!(plain.classifier(), None);
    assert_eq!(plain.extension(), "tar.gz");
  }

  #[test]
  fn parse_rejects_malformed() {
    assert!("widget".parse::<ArtifactReference>().is_err());
    assert!("widget::jar".parse::<ArtifactReference>().is_err());
    assert!("a:b:c:d:e".parse::<ArtifactReference>().is_err());
  }

  #[test]
  fn file_name_includes_classifier() {
    let reference = ArtifactReference::new("org.example/widget", "2.1", "jar");
    assert_eq!(reference.file_name(), "widget-2.1.jar");
    assert_eq!(
      reference.with_classifier("docs").file_name(),
      "widget-2.1-docs.jar"
    );
  }
}

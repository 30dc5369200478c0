use kiln_config::TaskDef;
use kiln_resolver::ResolveError;
use serde::de::DeserializeOwned;

/// Deserialize a definition's `options`, using the default when absent.
pub(crate) fn parse<T>(def: &TaskDef) -> Result<T, ResolveError>
where
  T: DeserializeOwned + Default,
{
  if def.options.is_null() {
    return Ok(T::default());
  }
  serde_json::from_value(def.options.clone())
    .map_err(|e| ResolveError::invalid_options(def.display_name(), e.to_string()))
}

/// Like [`parse`] for options that have no sensible default.
pub(crate) fn parse_required<T>(def: &TaskDef) -> Result<T, ResolveError>
where
  T: DeserializeOwned,
{
  if def.options.is_null() {
    return Err(ResolveError::invalid_options(
      def.display_name(),
      "options are required",
    ));
  }
  serde_json::from_value(def.options.clone())
    .map_err(|e| ResolveError::invalid_options(def.display_name(), e.to_string()))
}

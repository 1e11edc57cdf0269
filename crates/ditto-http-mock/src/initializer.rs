//! Loads expectations from a JSON file at start-up.

use crate::expectation::{parse_expectations, Cause, Expectation, ExpectationRegistry};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Read a file holding one expectation or an array of them.
pub fn load_expectations(path: impl AsRef<Path>) -> Result<Vec<Expectation>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read expectation file: {}", path.display()))?;
    parse_expectations(&content)
        .with_context(|| format!("Failed to parse expectation file: {}", path.display()))
}

/// Load `path` into the registry, replacing earlier file-sourced expectations.
pub fn initialize(registry: &ExpectationRegistry, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let expectations = load_expectations(path)?;
    let loaded = registry
        .update(expectations, Cause::FileInitialiser)
        .with_context(|| format!("Invalid expectation in {}", path.display()))?;
    info!("Loaded {} expectation(s) from {}", loaded.len(), path.display());
    Ok(loaded.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::RegistryConfig;
    use crate::scheduler::Scheduler;
    use std::io::Write;
    use std::sync::Arc;

    fn registry() -> ExpectationRegistry {
        ExpectationRegistry::new(RegistryConfig::default(), Arc::new(Scheduler::synchronous().unwrap()))
    }

    fn file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_initialize_array() {
        let f = file(
            r#"[
                {"id": "a", "httpRequest": {"path": "/a"}, "httpResponse": {"body": "A"}},
                {"id": "b", "httpRequest": {"path": "/b"}, "httpResponse": {"statusCode": 204}}
            ]"#,
        );
        let registry = registry();
        assert_eq!(initialize(&registry, f.path()).unwrap(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn test_initialize_single_object() {
        let f = file(r#"{"httpRequest": {"method": "GET"}, "httpResponse": {}}"#);
        let registry = registry();
        assert_eq!(initialize(&registry, f.path()).unwrap(), 1);
    }

    #[test]
    fn test_reload_replaces_file_expectations() {
        let registry = registry();
        let first = file(r#"[{"id": "a", "httpRequest": {}, "httpResponse": {}}]"#);
        initialize(&registry, first.path()).unwrap();
        let second = file(r#"[{"id": "b", "httpRequest": {}, "httpResponse": {}}]"#);
        initialize(&registry, second.path()).unwrap();
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn test_errors() {
        let registry = registry();
        assert!(initialize(&registry, "/nonexistent/ditto/expectations.json").is_err());

        let bad = file("{not json");
        let err = initialize(&registry, bad.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        assert!(registry.is_empty());
    }
}

//! Loading `cadence.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use cadence_types::config::AppConfig;

/// Read the config file at `path`, or use defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_uses_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.engine.max_concurrent_executions, 10);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn loads_agents_and_engine_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[engine]
max_concurrent_executions = 3

[logging]
json = true

[[agents]]
id = "bob"
skills = ["rust", "testing"]
"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_concurrent_executions, 3);
        assert!(config.logging.json);
        assert_eq!(config.agents[0].skills, vec!["rust", "testing"]);
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let msg = load(Some(Path::new("/definitely/not/here.toml")))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("/definitely/not/here.toml"), "got: {msg}");
    }
}

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::ParlorConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parlor.toml", "parlor.yaml", "parlor.yml", "parlor.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<ParlorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parlor.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parlor/parlor.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParlorConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> ParlorConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ParlorConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            ParlorConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/parlor/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parlor").map(|d| d.config_dir().to_path_buf())
}

/// Parse raw config text, picking the format from the file extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<ParlorConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use parlor_common::Priority;

    use super::*;

    #[test]
    fn loads_yaml_and_json() {
        let tmp = tempfile::tempdir().unwrap();

        let yaml = tmp.path().join("parlor.yaml");
        std::fs::write(
            &yaml,
            "plugins:\n  max_concurrent: 4\n  entries:\n    ollama:\n      priority: critical\n",
        )
        .unwrap();
        let cfg = load_config(&yaml).unwrap();
        assert_eq!(cfg.plugins.max_concurrent, 4);
        assert_eq!(
            cfg.plugins.entry("ollama").priority,
            Some(Priority::Critical)
        );

        let json = tmp.path().join("parlor.json");
        std::fs::write(&json, r#"{"plugins": {"hook_timeout_secs": 2}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().plugins.hook_timeout_secs, 2);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = parse_config("", Path::new("parlor.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension, .. } if extension == "ini"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/parlor.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/parlor.toml"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = parse_config("[plugins\nbroken", Path::new("parlor.toml")).unwrap_err();
        assert!(matches!(err, Error::TomlDe(_)));
    }
}

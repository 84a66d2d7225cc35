use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "GIT_ANNOTATE_CONFIG";

/// Settings read from `config.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Default output document path.
    pub output: Option<PathBuf>,
    /// Default `git diff` arguments.
    pub diff_args: Vec<String>,
    pub include_untracked: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: None,
            diff_args: Vec::new(),
            include_untracked: true,
        }
    }
}

/// Load configuration from `explicit`, `$GIT_ANNOTATE_CONFIG`, or the user
/// config directory, in that order.
///
/// A missing file in the default location yields defaults; a file named
/// explicitly must exist and parse.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return load_config_from(Path::new(&path));
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Ok(AppConfig::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn default_config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".config/git-annotate/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.include_untracked);
    }

    #[test]
    fn reads_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "output = \"review.xml\"\ndiff_args = [\"--cached\"]\ninclude_untracked = false\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.output, Some(PathBuf::from("review.xml")));
        assert_eq!(config.diff_args, vec!["--cached".to_string()]);
        assert!(!config.include_untracked);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "include_untracked = \"sometimes\"").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}

use crate::application::diff::DEFAULT_THRESHOLD;
use crate::domain::DEFAULT_BRANCH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_PATH_VAR: &str = "DIFFIT_CONFIG_PATH";
const DATA_HOME_VAR: &str = "DIFFIT_DATA_HOME";
const DB_PATH_VAR: &str = "DIFFIT_DB_PATH";
const STORAGE_PATH_VAR: &str = "DIFFIT_STORAGE_PATH";

/// Runtime settings, read from `config.toml` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub storage_path: PathBuf,
    /// Per-pixel comparator tolerance in `[0, 1]`.
    pub threshold: f64,
    pub comparison_timeout_secs: u64,
    pub max_concurrent_comparisons: usize,
    /// Default branch for projects created without one.
    pub default_branch: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = app_data_dir();
        Self {
            database_path: data_dir.join("db.sqlite"),
            storage_path: data_dir.join("storage"),
            threshold: DEFAULT_THRESHOLD,
            comparison_timeout_secs: 30,
            max_concurrent_comparisons: 4,
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a config file body, replacing out-of-range values with defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        let defaults = AppConfig::default();
        if !(0.0..=1.0).contains(&self.threshold) || self.threshold.is_nan() {
            log::warn!(
                "Configured threshold {} is outside [0, 1]; using {}",
                self.threshold,
                defaults.threshold
            );
            self.threshold = defaults.threshold;
        }
        if self.comparison_timeout_secs == 0 {
            log::warn!("comparison_timeout_secs must be positive; using default");
            self.comparison_timeout_secs = defaults.comparison_timeout_secs;
        }
        if self.max_concurrent_comparisons == 0 {
            log::warn!("max_concurrent_comparisons must be positive; using default");
            self.max_concurrent_comparisons = defaults.max_concurrent_comparisons;
        }
        if self.default_branch.trim().is_empty() {
            self.default_branch = defaults.default_branch;
        }
        self
    }

    /// Apply `DIFFIT_DB_PATH` / `DIFFIT_STORAGE_PATH` style overrides.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = var(DB_PATH_VAR) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = var(STORAGE_PATH_VAR) {
            self.storage_path = PathBuf::from(path);
        }
        self
    }
}

/// Load the config file (if any) and apply environment overrides.
pub fn load_config() -> AppConfig {
    load_config_from(&config_path()).with_overrides(|name| std::env::var(name).ok())
}

/// Missing file yields defaults; an unparsable one is reported and ignored.
pub fn load_config_from(path: &Path) -> AppConfig {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return AppConfig::default();
    };
    match AppConfig::from_toml_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Ignoring invalid config at {}: {err}", path.display());
            AppConfig::default()
        }
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        return PathBuf::from(path);
    }

    app_data_dir().join("config.toml")
}

fn app_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(DATA_HOME_VAR) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("Diffit");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("Diffit");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("diffit");
        }
        if let Some(home) = home::home_dir() {
            return home.join(".local").join("share").join("diffit");
        }
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".diffit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str("threshold = 0.25\ndefault_branch = \"trunk\"\n")
            .unwrap();
        assert_eq!(config.threshold, 0.25);
        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.comparison_timeout_secs, 30);
        assert_eq!(config.max_concurrent_comparisons, 4);
    }

    #[test]
    fn test_out_of_range_threshold_falls_back() {
        let config = AppConfig::from_toml_str("threshold = 3.0").unwrap();
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "threshold = [not toml").unwrap();
        assert_eq!(load_config_from(&path).threshold, DEFAULT_THRESHOLD);
        assert_eq!(
            load_config_from(&tmp.path().join("missing.toml")).default_branch,
            "main"
        );
    }

    #[test]
    fn test_env_overrides_paths() {
        let vars: HashMap<&str, &str> = [(DB_PATH_VAR, "/tmp/x.sqlite")].into_iter().collect();
        let config = AppConfig::default().with_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.sqlite"));
        assert_ne!(config.storage_path, PathBuf::from("/tmp/x.sqlite"));
    }
}

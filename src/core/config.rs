use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "PRICECAST_API_URL";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChartConfig {
    /// Grades shown by `chart` when none are given on the command line.
    pub grades: Vec<String>,
    pub days: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        ChartConfig {
            grades: vec![crate::core::models::DEFAULT_GRADE.to_string()],
            days: 180,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    /// Loads the config from the default location, or defaults if none exists.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default().with_env_override(std::env::var(API_URL_ENV).ok()));
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config.with_env_override(std::env::var(API_URL_ENV).ok()))
    }

    /// Replaces the API base URL when an override is set and non-empty.
    pub fn with_env_override(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            debug!("Overriding API base URL from {}", API_URL_ENV);
            self.api.base_url = url;
        }
        self
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "pricecast", "pricecast")
        .context("Could not determine project directories")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = serde_yaml::from_str("data_path: null").unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.chart.grades, vec!["대란".to_string()]);
        assert_eq!(config.chart.days, 180);
    }

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
api:
  base_url: "https://eggs.example.com/api/v1"
chart:
  grades: ["특란", "대란"]
  days: 90
data_path: "/tmp/pricecast"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.api.base_url, "https://eggs.example.com/api/v1");
        assert_eq!(config.chart.grades.len(), 2);
        assert_eq!(config.chart.days, 90);
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/pricecast")
        );
    }

    #[test]
    fn test_env_override() {
        let config = AppConfig::default().with_env_override(Some("http://other/api".into()));
        assert_eq!(config.api.base_url, "http://other/api");

        let config = AppConfig::default().with_env_override(Some("  ".into()));
        assert_eq!(config.api.base_url, DEFAULT_API_URL);

        let config = AppConfig::default().with_env_override(None);
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_load_from_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "api:\n  base_url: http://127.0.0.1:9/api\n").unwrap();
        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert!(!config.api.base_url.is_empty());
    }
}

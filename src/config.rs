use std::ffi::OsString;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub base_url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_story_points_field")]
    pub story_points_field: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            story_points_field: default_story_points_field(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub jira_base_url: Option<String>,
    pub jira_user: Option<String>,
    pub jira_password: Option<String>,
    pub cache_db_path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {path}. expected at $XDG_CONFIG_HOME/jira-cache/config.toml or ~/.config/jira-cache/config.toml")]
    MissingConfigFile { path: PathBuf },
    #[error("failed to resolve config path: HOME is not set and XDG_CONFIG_HOME is unset")]
    MissingHomeDirectory,
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load() -> Result<AppConfig, ConfigError> {
    let path = resolve_config_path()?;
    load_from(&path)
}

pub fn load_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let path = path.to_path_buf();
    let raw = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingConfigFile { path: path.clone() }
        } else {
            ConfigError::ReadFailed {
                path: path.clone(),
                source,
            }
        }
    })?;

    let cfg = toml::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::ParseFailed {
        path: path.clone(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME");
    let home = std::env::var_os("HOME");
    resolve_config_path_from_env(xdg_config_home, home)
}

fn resolve_config_path_from_env(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = xdg_config_home.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("jira-cache").join("config.toml"));
    }

    let home = home
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingHomeDirectory)?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("jira-cache")
        .join("config.toml"))
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.jira_base_url {
            self.jira.base_url = value.clone();
        }
        if let Some(value) = &overrides.jira_user {
            self.jira.user = value.clone();
        }
        if let Some(value) = &overrides.jira_password {
            self.jira.password = value.clone();
        }
        if let Some(value) = &overrides.cache_db_path {
            self.cache.db_path = value.clone();
        }

        self.validate()
    }

    /// Cache path with a leading `~` expanded against `$HOME`.
    pub fn cache_path(&self) -> PathBuf {
        expand_tilde(&self.cache.db_path, std::env::var_os("HOME"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jira.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "jira.base_url must not be empty".into(),
            ));
        }
        if self.jira.user.trim().is_empty() {
            return Err(ConfigError::Invalid("jira.user must not be empty".into()));
        }
        if self.jira.password.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "jira.password must not be empty".into(),
            ));
        }
        if self.cache.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.db_path must not be empty".into(),
            ));
        }
        if self.sync.story_points_field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sync.story_points_field must not be empty".into(),
            ));
        }

        Ok(())
    }
}

fn expand_tilde(raw: &str, home: Option<OsString>) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = home.filter(|value| !value.is_empty()) {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(raw)
}

fn default_story_points_field() -> String {
    "customfield_10600".to_string()
}

//! Configuration file management for immo.
//!
//! Provides a TOML-based config file at `~/.config/immo/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use immo_core::llm::ProviderConfig;
use immo_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the immo config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/immo` or `~/.config/immo`,
/// on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("immo");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("immo")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(&config_path(), config)
}

/// Write the config file, creating parent dirs as needed. The file may hold
/// an API key, so it is made owner-only on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct ImmoConfig {
    pub db_config: DbConfig,
    pub provider: ProviderConfig,
    pub allowed_origins: Vec<String>,
}

impl ImmoConfig {
    /// Resolve from the process environment and the config file, if any.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let path = config_path();
        let file = if path.exists() {
            Some(load_config_from(&path)?)
        } else {
            None
        };
        Ok(Self::resolve_with(cli_db_url, file.as_ref(), |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }))
    }

    /// Resolution chain with the environment supplied by `env`.
    ///
    /// - DB URL: `cli_db_url` > `IMMO_DATABASE_URL` > `DATABASE_URL` > `database.url` > default
    /// - Pool size: `IMMO_DB_MAX_CONNECTIONS` > default
    /// - API key: `ANTHROPIC_API_KEY` > `provider.api_key` > empty
    /// - Model: `IMMO_MODEL` > `provider.model` > default
    /// - Base URL: `IMMO_ANTHROPIC_BASE_URL` > default
    /// - CORS origins: `IMMO_ALLOWED_ORIGINS` (comma separated) > `server.allowed_origins`
    pub fn resolve_with(
        cli_db_url: Option<&str>,
        file: Option<&ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let db_url = cli_db_url
            .map(str::to_owned)
            .or_else(|| env("IMMO_DATABASE_URL"))
            .or_else(|| env("DATABASE_URL"))
            .or_else(|| file.map(|f| f.database.url.clone()))
            .unwrap_or_else(|| DbConfig::DEFAULT_URL.to_owned());
        let max_connections = env("IMMO_DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DbConfig::DEFAULT_MAX_CONNECTIONS);
        let db_config = DbConfig::new(db_url).with_max_connections(max_connections);

        let provider_file = file.map(|f| &f.provider);
        let api_key = env("ANTHROPIC_API_KEY")
            .or_else(|| provider_file.and_then(|p| p.api_key.clone()))
            .unwrap_or_default();
        let model = env("IMMO_MODEL")
            .or_else(|| provider_file.and_then(|p| p.model.clone()))
            .unwrap_or_else(|| ProviderConfig::DEFAULT_MODEL.to_owned());
        let mut provider = ProviderConfig::new(api_key).with_model(model);
        if let Some(url) = env("IMMO_ANTHROPIC_BASE_URL") {
            provider = provider.with_base_url(url);
        }

        let allowed_origins = match env("IMMO_ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect(),
            None => file
                .map(|f| f.server.allowed_origins.clone())
                .unwrap_or_default(),
        };

        Self {
            db_config,
            provider,
            allowed_origins,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn sample_file() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://filehost:5432/filedb".to_owned(),
            },
            provider: ProviderSection {
                api_key: Some("sk-file".to_owned()),
                model: Some("claude-file".to_owned()),
            },
            server: ServerSection {
                allowed_origins: vec!["https://app.example.com".to_owned()],
            },
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("immo").join("config.toml");

        let original = sample_file();
        save_config_to(&path, &original).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, original);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "config file should be owner-only");
        }
    }

    #[test]
    fn provider_and_server_sections_are_optional() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[database]\nurl = \"postgresql://h:5432/d\"\n").unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.database.url, "postgresql://h:5432/d");
        assert_eq!(loaded.provider, ProviderSection::default());
        assert!(loaded.server.allowed_origins.is_empty());
    }

    #[test]
    fn load_config_reports_the_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("missing.toml");
        let err = load_config_from(&path).unwrap_err();
        assert!(
            format!("{err:#}").contains("missing.toml"),
            "error should name the file, got: {err:#}"
        );
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = ImmoConfig::resolve_with(None, None, env_from(&[]));
        assert_eq!(cfg.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(cfg.db_config.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.provider.model, ProviderConfig::DEFAULT_MODEL);
        assert_eq!(cfg.provider.base_url, ProviderConfig::DEFAULT_BASE_URL);
        assert!(cfg.provider.api_key.is_empty());
        assert!(cfg.allowed_origins.is_empty());
    }

    #[test]
    fn file_values_used_when_env_is_empty() {
        let file = sample_file();
        let cfg = ImmoConfig::resolve_with(None, Some(&file), env_from(&[]));
        assert_eq!(cfg.db_config.database_url, "postgresql://filehost:5432/filedb");
        assert_eq!(cfg.provider.api_key, "sk-file");
        assert_eq!(cfg.provider.model, "claude-file");
        assert_eq!(cfg.allowed_origins, vec!["https://app.example.com"]);
    }

    #[test]
    fn env_overrides_file() {
        let file = sample_file();
        let env = env_from(&[
            ("DATABASE_URL", "postgresql://generic:5432/g"),
            ("IMMO_DATABASE_URL", "postgresql://envhost:5432/envdb"),
            ("IMMO_DB_MAX_CONNECTIONS", "12"),
            ("ANTHROPIC_API_KEY", "sk-env"),
            ("IMMO_MODEL", "claude-env"),
            ("IMMO_ANTHROPIC_BASE_URL", "http://localhost:9999"),
            ("IMMO_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ]);
        let cfg = ImmoConfig::resolve_with(None, Some(&file), env);
        assert_eq!(cfg.db_config.database_url, "postgresql://envhost:5432/envdb");
        assert_eq!(cfg.db_config.max_connections, 12);
        assert_eq!(cfg.provider.api_key, "sk-env");
        assert_eq!(cfg.provider.model, "claude-env");
        assert_eq!(cfg.provider.base_url, "http://localhost:9999");
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn generic_database_url_is_a_fallback() {
        let file = sample_file();
        let env = env_from(&[("DATABASE_URL", "postgresql://generic:5432/g")]);
        let cfg = ImmoConfig::resolve_with(None, Some(&file), env);
        assert_eq!(cfg.db_config.database_url, "postgresql://generic:5432/g");
    }

    #[test]
    fn cli_flag_overrides_everything() {
        let file = sample_file();
        let env = env_from(&[("IMMO_DATABASE_URL", "postgresql://envhost:5432/envdb")]);
        let cfg = ImmoConfig::resolve_with(Some("postgresql://cli:5432/clidb"), Some(&file), env);
        assert_eq!(cfg.db_config.database_url, "postgresql://cli:5432/clidb");
    }

    #[test]
    fn unparseable_pool_size_falls_back() {
        let env = env_from(&[("IMMO_DB_MAX_CONNECTIONS", "lots")]);
        let cfg = ImmoConfig::resolve_with(None, None, env);
        assert_eq!(cfg.db_config.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
    }
}

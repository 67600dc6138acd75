use std::path::{Path, PathBuf};

use chatrelay_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

const STORE_FILE: &str = "chat.db";

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".chatrelay"));
        let xdg_config = dirs::config_dir().map(|c| c.join("chatrelay"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                // An existing XDG dir wins, then an existing home dir; new installs go to XDG.
                if xdg.exists() || !home.exists() {
                    xdg
                } else {
                    home
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".chatrelay"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns true if a config file (YAML or TOML) exists on disk.
    pub fn config_file_exists(&self) -> bool {
        self.config_dir.join("config.yml").exists() || self.config_dir.join("config.toml").exists()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Directory holding runtime data such as the SQLite database.
    pub fn data_dir(&self, config: &AppConfig) -> PathBuf {
        config
            .data_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("data"))
    }

    /// Database file for the sqlite turn store.
    pub fn store_path(&self, config: &AppConfig) -> PathBuf {
        config
            .store
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir(config).join(STORE_FILE))
    }

    /// Write a commented starter `config.yml` unless one already exists.
    /// Returns true when a file was written.
    pub fn write_default_config(&self) -> Result<bool> {
        if self.config_file_exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::write(self.config_dir.join("config.yml"), DEFAULT_CONFIG_YAML)?;
        info!("wrote starter config to {}", self.config_dir.display());
        Ok(true)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.config_dir.join("data")];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

const DEFAULT_CONFIG_YAML: &str = "\
gateway:
  host: 127.0.0.1
  port: 3000
  # api_key: change-me

llm:
  main:
    provider: openai
    model: gpt-4.1-mini
    # api_key falls back to OPENAI_API_KEY

store:
  backend: sqlite

chat:
  max_duration_secs: 30
  persist_partial: true

log_level: info
";

#[cfg(test)]
mod tests {
    use super::ConfigLoader;
    use crate::model::{AppConfig, StoreBackend};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "chatrelay-config-test-{}-{}-{}",
            label,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn load_returns_default_when_no_config_exists() {
        let dir = temp_dir("default");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert!(config.llm.is_empty());
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.chat.max_duration_secs, 30);
        assert!(config.chat.persist_partial);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_prefers_yaml_over_toml_when_both_exist() {
        let dir = temp_dir("yaml-precedence");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.yml"),
            "gateway:\n  host: \"0.0.0.0\"\n  port: 4001\n",
        )
        .expect("failed to write yaml config");
        fs::write(
            dir.join("config.toml"),
            "[gateway]\nhost = \"127.0.0.2\"\nport = 4999\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 4001);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_reads_toml_when_yaml_missing() {
        let dir = temp_dir("toml");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.toml"),
            "[gateway]\nhost = \"127.0.0.2\"\nport = 4002\n\n[store]\nbackend = \"memory\"\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.gateway.host, "127.0.0.2");
        assert_eq!(config.gateway.port, 4002);
        assert_eq!(config.store.backend, StoreBackend::Memory);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_reports_parse_errors_as_config_errors() {
        let dir = temp_dir("broken");
        fs::create_dir_all(&dir).expect("failed to create temp dir");
        fs::write(dir.join("config.yml"), "gateway: [not, a, map]\n")
            .expect("failed to write yaml config");

        let err = ConfigLoader::with_dir(&dir).load().unwrap_err();
        assert!(err.to_string().contains("failed to parse YAML config"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn starter_config_parses_and_is_not_overwritten() {
        let dir = temp_dir("starter");
        let loader = ConfigLoader::with_dir(&dir);

        assert!(loader.write_default_config().expect("write should succeed"));
        assert!(!loader.write_default_config().expect("second write should succeed"));

        let config = loader.load().expect("starter config should parse");
        let main = config.llm.get("main").expect("main provider present");
        assert_eq!(main.provider, "openai");
        assert_eq!(main.model.as_deref(), Some("gpt-4.1-mini"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn store_path_defaults_under_data_dir() {
        let dir = temp_dir("store-path");
        let loader = ConfigLoader::with_dir(&dir);

        let config = AppConfig::default();
        assert_eq!(loader.store_path(&config), dir.join("data").join("chat.db"));

        let mut config = AppConfig::default();
        config.data_dir = Some(PathBuf::from("/var/lib/chatrelay"));
        assert_eq!(
            loader.store_path(&config),
            PathBuf::from("/var/lib/chatrelay/chat.db")
        );
    }

    #[test]
    fn ensure_dirs_creates_expected_subdirectories() {
        let dir = temp_dir("ensure-dirs");
        let loader = ConfigLoader::with_dir(&dir);

        loader.ensure_dirs().expect("ensure_dirs should succeed");

        assert!(dir.exists());
        assert!(dir.join("data").exists());

        let _ = fs::remove_dir_all(dir);
    }
}

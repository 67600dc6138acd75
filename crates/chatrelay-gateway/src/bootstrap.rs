use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_agents::{ChatRuntime, ChatSettings, OpenAiProvider};
use chatrelay_common::{Error, Result};
use chatrelay_config::{AppConfig, ChatConfig, StoreBackend};
use chatrelay_db::{InMemoryTurnStore, SqliteTurnStore, TurnStore};
use tracing::{info, warn};

use crate::state::{AppState, SharedState};

/// Resolve an API key: config value first, then the environment variable.
pub fn resolve_api_key(config_key: Option<&str>, env_var: &str) -> Option<String> {
    if let Some(key) = config_key.filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

/// Open the turn store selected by `store.backend`.
pub fn build_store(config: &AppConfig, store_path: &Path) -> Result<Arc<dyn TurnStore>> {
    info!("opening {} turn store", config.store.backend.as_str());
    match config.store.backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = store_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Database(format!(
                            "failed to create store directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
            }
            let store = SqliteTurnStore::open(store_path)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using in-memory turn store, conversations are lost on restart");
            Ok(Arc::new(InMemoryTurnStore::new()))
        }
    }
}

pub fn chat_settings(chat: &ChatConfig) -> ChatSettings {
    ChatSettings {
        model: chat.model.clone(),
        system_prompt: chat.system_prompt.clone(),
        max_tokens: chat.max_tokens,
        max_duration: (chat.max_duration_secs > 0)
            .then(|| Duration::from_secs(chat.max_duration_secs)),
        persist_partial: chat.persist_partial,
    }
}

/// Build a `ChatRuntime` with every usable provider from the config.
/// Providers are registered in name order; the first becomes the default.
pub fn build_chat_runtime(config: &AppConfig, store: Arc<dyn TurnStore>) -> ChatRuntime {
    let mut runtime = ChatRuntime::new(store, chat_settings(&config.chat));

    let mut names: Vec<&String> = config.llm.keys().collect();
    names.sort();

    for name in names {
        let llm_config = &config.llm[name];
        match llm_config.provider.as_str() {
            "openai" => {
                let api_key = resolve_api_key(llm_config.api_key.as_deref(), "OPENAI_API_KEY");

                if let Some(key) = api_key {
                    let provider = OpenAiProvider::new(
                        key,
                        llm_config.model.clone(),
                        llm_config.base_url.clone(),
                    );
                    runtime.register_provider(Box::new(provider));
                    info!("configured openai provider: {name}");
                } else {
                    warn!(
                        "skipping openai provider {name}: no API key (set api_key in config or OPENAI_API_KEY env var)"
                    );
                }
            }
            other => {
                warn!("unknown LLM provider type: {other}, skipping {name}");
            }
        }
    }

    if runtime.default_provider().is_none() {
        if let Some(key) = resolve_api_key(None, "OPENAI_API_KEY") {
            runtime.register_provider(Box::new(OpenAiProvider::new(key, None, None)));
            info!("configured default openai provider from OPENAI_API_KEY");
        } else {
            warn!("no LLM provider configured, chat requests will fail");
        }
    }

    runtime
}

/// Wire config, store and runtime into the shared gateway state.
pub fn build_state(config: AppConfig, store_path: &Path) -> Result<SharedState> {
    let store = build_store(&config, store_path)?;
    info!("turn store backend: {}", store.backend());
    let runtime = build_chat_runtime(&config, store);
    Ok(Arc::new(AppState::new(config, runtime)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_config::LlmProviderConfig;

    #[test]
    fn config_key_wins_over_environment() {
        assert_eq!(
            resolve_api_key(Some("from-config"), "CHATRELAY_TEST_UNSET_KEY"),
            Some("from-config".to_string())
        );
        assert_eq!(resolve_api_key(Some(""), "CHATRELAY_TEST_UNSET_KEY"), None);
    }

    #[test]
    fn zero_duration_disables_the_deadline() {
        let chat = ChatConfig {
            max_duration_secs: 0,
            ..ChatConfig::default()
        };
        assert!(chat_settings(&chat).max_duration.is_none());
        assert_eq!(
            chat_settings(&ChatConfig::default()).max_duration,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn sqlite_store_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");

        let store = build_store(&AppConfig::default(), &path).expect("store should open");
        assert_eq!(store.backend(), StoreBackend::Sqlite.as_str());
        assert!(path.exists());
    }

    #[test]
    fn memory_backend_is_selectable() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;

        let store = build_store(&config, Path::new("unused.db")).unwrap();
        assert_eq!(store.backend(), StoreBackend::Memory.as_str());
    }

    #[test]
    fn configured_openai_provider_becomes_default() {
        let mut config = AppConfig::default();
        config.llm.insert(
            "main".to_string(),
            LlmProviderConfig {
                provider: "openai".to_string(),
                model: Some("gpt-4o".to_string()),
                api_key: Some("sk-test".to_string()),
                base_url: None,
            },
        );

        let runtime = build_chat_runtime(&config, Arc::new(InMemoryTurnStore::new()));
        let provider = runtime.default_provider().expect("provider registered");
        assert_eq!(provider.provider_id(), "openai");
        assert_eq!(runtime.effective_model(), Some("gpt-4o"));
    }
}

use std::sync::Arc;

use chatrelay_agents::ChatRuntime;
use chatrelay_config::AppConfig;
use chatrelay_db::TurnStore;

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: ChatRuntime,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig, runtime: ChatRuntime) -> Self {
        Self { config, runtime }
    }

    pub fn store(&self) -> &Arc<dyn TurnStore> {
        self.runtime.store()
    }

    /// Bearer token required on `/api/*`, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.config
            .gateway
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }
}

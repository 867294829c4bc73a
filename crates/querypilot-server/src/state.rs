//! Shared server state.

use std::sync::Arc;

use querypilot_core::config::Config;
use querypilot_providers::ProviderRegistry;
use querypilot_tools::StudioBackend;

/// State shared by all request handlers. Conversations themselves are
/// never stored here — each streaming request owns its own loop.
pub struct AppState {
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,
    pub backend: Arc<dyn StudioBackend>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        providers: Arc<ProviderRegistry>,
        backend: Arc<dyn StudioBackend>,
    ) -> Self {
        Self {
            config,
            providers,
            backend,
        }
    }
}

use std::sync::{Arc, RwLock};

use skeep_keys::catalog::TokenCatalog;
use tracing::{error, info};

use crate::cache::SecretCache;
use crate::config::Settings;
use crate::store::SecretStore;

/// Process-wide state shared by the supervisor and every worker: the
/// settings, the token catalogue (swappable on reload), the persistent
/// store, and the cache. One instance per daemon, passed explicitly.
pub struct ServerContext {
    pub settings: Settings,
    catalog: RwLock<Arc<TokenCatalog>>,
    pub store: SecretStore,
    pub cache: SecretCache,
}

impl ServerContext {
    pub fn new(
        settings: Settings,
        catalog: TokenCatalog,
        store: SecretStore,
        cache: SecretCache,
    ) -> ServerContext {
        ServerContext {
            settings,
            catalog: RwLock::new(Arc::new(catalog)),
            store,
            cache,
        }
    }

    /// The current catalogue. Workers hold the returned `Arc` for the
    /// duration of one request; a concurrent reload does not disturb them.
    pub fn catalog(&self) -> Arc<TokenCatalog> {
        self.catalog.read().unwrap().clone()
    }

    /// Rebuild the catalogue from the configured token specs and swap it
    /// in atomically. On failure the previous catalogue stays in place.
    pub fn reload_tokens(&self) {
        info!("reloading token catalogue");
        match TokenCatalog::load(&self.settings.tokens) {
            Ok(catalog) => {
                *self.catalog.write().unwrap() = Arc::new(catalog);
            }
            Err(e) => error!("token reload failed, keeping the previous catalogue: {e}"),
        }
    }
}

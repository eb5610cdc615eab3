//! The cache layer in front of the persistent store.
//!
//! A process-local map is always consulted first and is authoritative on a
//! hit. With the `memcache` strategy an external shared cache sits behind
//! it; the shared cache is assumed publicly readable and writable, so
//! entries are sealed per-instance (see [`shared`]). Either way the
//! persistent store remains the source of truth: a miss here is never an
//! error.

use std::collections::HashMap;
use std::sync::RwLock;

use skeep_keys::catalog::TokenCatalog;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::store::SecretStore;

mod shared;
pub use shared::{CacheError, InstanceKey, SharedCache};

pub struct SecretCache {
    local: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
    shared: Option<SharedCache>,
}

impl SecretCache {
    /// The `preload` strategy: nothing but the in-process map.
    pub fn local_only() -> SecretCache {
        SecretCache {
            local: RwLock::new(HashMap::new()),
            shared: None,
        }
    }

    /// The `memcache` strategy: local map first, shared tier behind it.
    pub fn with_shared(shared: SharedCache) -> SecretCache {
        SecretCache {
            local: RwLock::new(HashMap::new()),
            shared: Some(shared),
        }
    }

    /// Decrypt every slot in the store into the local map. Per-slot
    /// failures are logged and skipped; a fresh daemon with a missing key
    /// still serves what it can.
    pub fn preload(&self, store: &SecretStore, catalog: &TokenCatalog) {
        let keys = match store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("preload scan of {} failed: {e}", store.dir().display());
                return;
            }
        };

        let mut loaded = 0usize;
        for key in keys {
            match store.get(&key, catalog) {
                Ok(plaintext) => {
                    self.local
                        .write()
                        .unwrap()
                        .insert(key, Zeroizing::new(plaintext));
                    loaded += 1;
                }
                Err(e) => warn!("preload of '{key}' failed: {e}"),
            }
        }
        info!("preloaded {loaded} secret(s) from {}", store.dir().display());
    }

    pub fn get(&self, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        if let Some(value) = self.local.read().unwrap().get(key) {
            return Some(value.clone());
        }

        if let Some(shared) = &self.shared {
            if let Some(value) = shared.get(key) {
                let value = Zeroizing::new(value);
                self.local
                    .write()
                    .unwrap()
                    .insert(key.to_string(), value.clone());
                return Some(value);
            }
        }

        None
    }

    /// Record a known-good plaintext, after a successful `set` or a
    /// miss-then-store-read.
    pub fn insert(&self, key: &str, value: &[u8]) {
        self.local
            .write()
            .unwrap()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));

        if let Some(shared) = &self.shared {
            shared.put(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use skeep_keys::test_support::write_token_files;

    use super::*;

    #[test]
    fn local_insert_then_get() {
        let cache = SecretCache::local_only();
        assert!(cache.get("k").is_none());

        cache.insert("k", b"value");
        assert_eq!(cache.get("k").unwrap().as_slice(), b"value");

        cache.insert("k", b"newer");
        assert_eq!(cache.get("k").unwrap().as_slice(), b"newer");
    }

    #[test]
    fn preload_fills_the_local_map() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_token_files(dir.path(), "pre", 1, None);
        let catalog = TokenCatalog::load(&[spec]).unwrap();
        let store = SecretStore::new(dir.path().join("slots"));

        store.put("one", b"1", &catalog).unwrap();
        store.put("two", b"2", &catalog).unwrap();

        let cache = SecretCache::local_only();
        cache.preload(&store, &catalog);

        assert_eq!(cache.get("one").unwrap().as_slice(), b"1");
        assert_eq!(cache.get("two").unwrap().as_slice(), b"2");
        assert!(cache.get("three").is_none());
    }

    #[test]
    fn preload_of_an_empty_store_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_token_files(dir.path(), "e", 1, None);
        let catalog = TokenCatalog::load(&[spec]).unwrap();
        let store = SecretStore::new(dir.path().join("never_created"));

        let cache = SecretCache::local_only();
        cache.preload(&store, &catalog);
        assert!(cache.get("anything").is_none());
    }

    #[test]
    fn preload_skips_undecryptable_slots() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TokenCatalog::load(&[write_token_files(dir.path(), "w", 1, None)]).unwrap();
        let reader = TokenCatalog::load(&[write_token_files(dir.path(), "r", 2, None)]).unwrap();

        let store = SecretStore::new(dir.path().join("slots"));
        store.put("theirs", b"locked", &writer).unwrap();
        store.put("ours", b"open", &reader).unwrap();

        let cache = SecretCache::local_only();
        cache.preload(&store, &reader);
        assert!(cache.get("theirs").is_none());
        assert_eq!(cache.get("ours").unwrap().as_slice(), b"open");
    }
}

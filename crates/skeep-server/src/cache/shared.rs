//! Sealing for entries placed in the untrusted shared cache.
//!
//! Values are AES-256-GCM sealed under a per-instance key with the full
//! cache key (`skeepd:<namespace>:<secret_key>:`) as associated data and a
//! fresh 12-byte nonce per entry. Confidentiality comes from the instance
//! key never leaving the process; authenticity from the GCM tag, which
//! also binds the entry to its namespace and name. Anything that fails to
//! open is a cache miss, never an error.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Symmetric key generated at startup and held only in memory. Each
/// daemon instance reads back its own entries only; sharing entries
/// across instances is deliberately unsupported.
pub struct InstanceKey(Zeroizing<[u8; KEY_LEN]>);

impl InstanceKey {
    pub fn generate() -> InstanceKey {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        InstanceKey(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.as_ref()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("memcache: {0}")]
    Memcache(#[from] memcache::MemcacheError),
}

pub struct SharedCache {
    client: memcache::Client,
    namespace: String,
    cipher: Aes256Gcm,
}

impl SharedCache {
    pub fn connect(
        servers: &[String],
        namespace: &str,
        key: &InstanceKey,
    ) -> Result<SharedCache, CacheError> {
        let urls: Vec<String> = servers
            .iter()
            .map(|server| {
                if server.contains("://") {
                    server.clone()
                } else {
                    format!("memcache://{server}")
                }
            })
            .collect();

        Ok(SharedCache {
            client: memcache::Client::connect(urls)?,
            namespace: namespace.to_string(),
            cipher: key.cipher(),
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let cache_key = cache_key(&self.namespace, key);

        let sealed = match self.client.get::<Vec<u8>>(&cache_key) {
            Ok(Some(sealed)) => sealed,
            Ok(None) => return None,
            Err(e) => {
                warn!("shared cache get '{cache_key}': {e}");
                return None;
            }
        };

        match open_entry(&self.cipher, cache_key.as_bytes(), &sealed) {
            Some(plaintext) => Some(plaintext),
            None => {
                warn!("shared cache entry '{cache_key}' failed authentication, treating as a miss");
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: &[u8]) {
        let cache_key = cache_key(&self.namespace, key);
        let Some(sealed) = seal_entry(&self.cipher, cache_key.as_bytes(), value) else {
            return;
        };

        if let Err(e) = self.client.set(&cache_key, sealed.as_slice(), 0) {
            warn!("shared cache set '{cache_key}': {e}");
        }
    }
}

fn cache_key(namespace: &str, key: &str) -> String {
    format!("skeepd:{namespace}:{key}:")
}

fn seal_entry(cipher: &Aes256Gcm, aad: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .ok()?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Some(sealed)
}

fn open_entry(cipher: &Aes256Gcm, aad: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
    // nonce plus at least the GCM tag
    if sealed.len() < NONCE_LEN + 16 {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .ok()
}

//! The persistent encrypted store: one file per secret under
//! `storage.dir`, named by the secret's key, containing a PEM CMS
//! envelope. Writes go through a temp file and rename so a reader never
//! sees a half-written envelope.

use std::io::Write;
use std::path::{Path, PathBuf};

use skeep_keys::catalog::TokenCatalog;
use skeep_keys::recipient::parse_recipient_ids;
use skeep_keys::{KeyError, envelope};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid secret name '{0}'")]
    InvalidKey(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Envelope(#[from] KeyError),

    #[error("no such secret '{0}'")]
    NoSuchKey(String),

    #[error("no configured token can decrypt secret '{0}'")]
    NoKey(String),
}

pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(dir: PathBuf) -> SecretStore {
        SecretStore { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self, key: &str) -> bool {
        check_key(key).is_ok() && self.dir.join(key).is_file()
    }

    /// Seal `value` to the current token and atomically replace the slot.
    pub fn put(&self, key: &str, value: &[u8], catalog: &TokenCatalog) -> Result<(), StoreError> {
        check_key(key)?;

        let token = catalog.select_for_encrypt()?;
        let sealed = envelope::seal(value, token)?;

        std::fs::create_dir_all(&self.dir).map_err(|source| self.io_err(&self.dir, source))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|source| self.io_err(&self.dir, source))?;
        tmp.write_all(&sealed)
            .map_err(|source| self.io_err(tmp.path(), source))?;

        let slot = self.dir.join(key);
        tmp.persist(&slot)
            .map_err(|persist| self.io_err(&slot, persist.error))?;

        debug!("stored '{key}' for recipient '{}'", token.name());
        Ok(())
    }

    /// Read a slot and decrypt it, routing by the envelope's recipient
    /// infos first and enumerating every token when routing fails.
    pub fn get(&self, key: &str, catalog: &TokenCatalog) -> Result<Vec<u8>, StoreError> {
        check_key(key)?;

        let slot = self.dir.join(key);
        let sealed = match std::fs::read(&slot) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NoSuchKey(key.to_string()));
            }
            Err(source) => return Err(self.io_err(&slot, source)),
        };

        match parse_recipient_ids(&sealed) {
            Ok(recipients) => match catalog.select_for_decrypt(&recipients) {
                Some(token) => match envelope::open(&sealed, token) {
                    Ok(plaintext) => return Ok(plaintext),
                    Err(e) => {
                        warn!("secret '{key}': token '{}' matched but failed: {e}", token.name());
                    }
                },
                None => debug!("secret '{key}': no recipient matches the catalogue"),
            },
            Err(e) => warn!("secret '{key}': unreadable recipient info ({e})"),
        }

        for token in catalog.tokens() {
            if let Ok(plaintext) = envelope::open(&sealed, token) {
                warn!(
                    "secret '{key}' decrypted by enumeration with token '{}'",
                    token.name()
                );
                return Ok(plaintext);
            }
        }

        Err(StoreError::NoKey(key.to_string()))
    }

    /// Names of every slot currently on disk, for the preload scan.
    /// Entries that are not valid secret names are skipped.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_err(&self.dir, source)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| self.io_err(&self.dir, source))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if skeep_protocol::is_valid_key(name) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// The protocol parser already rejects these, but the store is usable as a
/// library: refuse anything that could leave `storage.dir`.
fn check_key(key: &str) -> Result<(), StoreError> {
    if skeep_protocol::is_valid_key(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

//! The in-memory token catalogue.
//!
//! Tokens are indexed two ways: by SHA-1 certificate fingerprint (the
//! primary handle, also the brute-force enumeration order) and by
//! `(issuer, serial)` for CMS recipient routing. One token, the one with
//! the greatest NotBefore, is `current`; all new envelopes are sealed to
//! it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::KeyError;
use crate::recipient::RecipientId;
use crate::token::{Token, TokenSpec};

#[derive(Default)]
pub struct TokenCatalog {
    by_fingerprint: BTreeMap<String, Arc<Token>>,
    by_issuer_serial: HashMap<RecipientId, Arc<Token>>,
    current: Option<Arc<Token>>,
}

impl TokenCatalog {
    /// Load every configured token. Any unreadable or unparseable token
    /// fails the whole load; callers decide whether that is fatal (startup)
    /// or keeps the previous catalogue (reload).
    pub fn load(specs: &[TokenSpec]) -> Result<TokenCatalog, KeyError> {
        let mut catalog = TokenCatalog::default();
        for spec in specs {
            catalog.insert(Arc::new(Token::load(spec)?));
        }

        if let Some(current) = &catalog.current {
            info!(
                "token catalogue: {} token(s), current is '{}' (not_before {})",
                catalog.by_fingerprint.len(),
                current.name(),
                current.cert_info().not_before
            );
        }

        Ok(catalog)
    }

    fn insert(&mut self, token: Arc<Token>) {
        let fingerprint = token.fingerprint().to_string();
        if self.by_fingerprint.contains_key(&fingerprint) {
            warn!(
                "token '{}' duplicates fingerprint {fingerprint}, skipping",
                token.name()
            );
            return;
        }

        // Greatest NotBefore wins; the 14-digit form makes the string
        // compare a timestamp compare. Ties keep the earlier-configured
        // token.
        let newer = match &self.current {
            Some(current) => {
                token.cert_info().not_before > current.cert_info().not_before
            }
            None => true,
        };
        if newer {
            self.current = Some(token.clone());
        }

        self.by_issuer_serial
            .insert(token.recipient_id(), token.clone());
        self.by_fingerprint.insert(fingerprint, token);
    }

    /// The token all new envelopes are sealed to.
    pub fn select_for_encrypt(&self) -> Result<&Arc<Token>, KeyError> {
        self.current.as_ref().ok_or(KeyError::NoEncryptionToken)
    }

    /// Walk an envelope's recipients in order and return the first token
    /// the catalogue knows. `None` sends the caller to brute-force
    /// enumeration.
    pub fn select_for_decrypt(&self, recipients: &[RecipientId]) -> Option<&Arc<Token>> {
        recipients
            .iter()
            .find_map(|id| self.by_issuer_serial.get(id))
    }

    pub fn current(&self) -> Option<&Arc<Token>> {
        self.current.as_ref()
    }

    /// All tokens in fingerprint order: the deterministic brute-force
    /// enumeration.
    pub fn tokens(&self) -> impl Iterator<Item = &Arc<Token>> {
        self.by_fingerprint.values()
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}

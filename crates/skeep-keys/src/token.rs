use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::debug;
use zeroize::Zeroizing;

use crate::certinfo::CertInfo;
use crate::error::KeyError;
use crate::recipient::RecipientId;

/// Where to find one token's material, as named by a config section.
#[derive(Clone)]
pub struct TokenSpec {
    /// Config section name, kept for log messages
    pub name: String,
    pub certificate: PathBuf,
    pub key: PathBuf,
    pub passphrase: Option<Zeroizing<String>>,
}

impl Debug for TokenSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSpec")
            .field("name", &self.name)
            .field("certificate", &self.certificate)
            .field("key", &self.key)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// A recipient identity: parsed certificate metadata plus the loaded
/// certificate and private key, usable for envelope encryption and
/// decryption.
pub struct Token {
    name: String,
    cert_info: CertInfo,
    cert: X509,
    key: PKey<Private>,
}

impl Token {
    pub fn load(spec: &TokenSpec) -> Result<Token, KeyError> {
        let cert_pem = read(&spec.certificate)?;
        let cert_info = CertInfo::from_pem(&cert_pem)?;
        let cert = X509::from_pem(&cert_pem)?;

        let key_pem = Zeroizing::new(read(&spec.key)?);
        let key = match &spec.passphrase {
            Some(passphrase) => {
                PKey::private_key_from_pem_passphrase(&key_pem, passphrase.as_bytes())?
            }
            None => PKey::private_key_from_pem(&key_pem)?,
        };

        debug!(
            "token '{}': subject '{}', serial {}, not_before {}",
            spec.name, cert_info.subject, cert_info.serial_hex, cert_info.not_before
        );

        Ok(Token {
            name: spec.name.clone(),
            cert_info,
            cert,
            key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cert_info(&self) -> &CertInfo {
        &self.cert_info
    }

    pub fn fingerprint(&self) -> &str {
        &self.cert_info.fingerprint
    }

    /// The identity CMS RecipientInfo structures carry for this token.
    pub fn recipient_id(&self) -> RecipientId {
        RecipientId::new(
            self.cert_info.issuer_der.clone(),
            &self.cert_info.serial_bytes,
        )
    }

    pub fn x509(&self) -> &X509 {
        &self.cert
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // no key material in logs
        write!(f, "Token({}, {})", self.name, self.cert_info.fingerprint)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|source| KeyError::Io {
        path: path.display().to_string(),
        source,
    })
}

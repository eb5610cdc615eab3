//! CMS envelope seal and open.
//!
//! Envelopes are EnvelopedData with AES-256-CBC content encryption and one
//! recipient, PEM encoded. Binary mode keeps the plaintext byte-exact; no
//! MIME canonicalization touches embedded CR/LF.

use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use openssl::symm::Cipher;

use crate::error::KeyError;
use crate::token::Token;

/// Encrypt `plaintext` to `token`'s certificate, returning the PEM envelope.
pub fn seal(plaintext: &[u8], token: &Token) -> Result<Vec<u8>, KeyError> {
    let mut recipients = Stack::new()?;
    recipients.push(token.x509().clone())?;

    let envelope = CmsContentInfo::encrypt(
        &recipients,
        plaintext,
        Cipher::aes_256_cbc(),
        CMSOptions::BINARY,
    )?;

    Ok(envelope.to_pem()?)
}

/// Decrypt a PEM envelope with `token`'s private key.
pub fn open(envelope_pem: &[u8], token: &Token) -> Result<Vec<u8>, KeyError> {
    let envelope = CmsContentInfo::from_pem(envelope_pem)?;
    Ok(envelope.decrypt(token.private_key(), token.x509())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::parse_recipient_ids;
    use crate::test_support::load_token;

    #[test]
    fn seal_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let token = load_token(dir.path(), "rt", 1, None);

        for plaintext in [
            b"hello".to_vec(),
            Vec::new(),
            (0u8..=255).collect::<Vec<u8>>(),
            b"line\r\nendings\rstay\nput\0".to_vec(),
        ] {
            let envelope = seal(&plaintext, &token).unwrap();
            assert!(envelope.starts_with(b"-----BEGIN CMS-----"));
            assert_eq!(open(&envelope, &token).unwrap(), plaintext);
        }
    }

    #[test]
    fn envelope_names_the_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let token = load_token(dir.path(), "named", 0x0badc0de, None);

        let envelope = seal(b"secret", &token).unwrap();
        let recipients = parse_recipient_ids(&envelope).unwrap();
        assert_eq!(recipients, vec![token.recipient_id()]);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let right = load_token(dir.path(), "right", 1, None);
        let wrong = load_token(dir.path(), "wrong", 2, None);

        let envelope = seal(b"secret", &right).unwrap();
        assert!(matches!(open(&envelope, &wrong), Err(KeyError::Crypto(_))));
    }

    #[test]
    fn garbage_envelope_is_a_crypto_error() {
        let dir = tempfile::tempdir().unwrap();
        let token = load_token(dir.path(), "g", 1, None);
        assert!(open(b"not an envelope", &token).is_err());
    }
}

//! Certificate and key generation for tests. Everything is created
//! in-process with openssl builders; nothing shells out.

use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509, X509NameBuilder};
use zeroize::Zeroizing;

use crate::token::{Token, TokenSpec};

/// Self-signed RSA-2048 X.509v3 certificate plus PKCS#8 key, both PEM.
pub fn generate_cert_and_key(
    cn: &str,
    serial: u32,
    not_before_unix: Option<i64>,
) -> (Vec<u8>, Vec<u8>) {
    let (cert, pkey) = build_self_signed(cn, serial, not_before_unix);
    (
        cert.to_pem().unwrap(),
        pkey.private_key_to_pem_pkcs8().unwrap(),
    )
}

/// Write `<name>.crt` / `<name>.key` under `dir` and return the spec
/// pointing at them.
pub fn write_token_files(
    dir: &Path,
    name: &str,
    serial: u32,
    not_before_unix: Option<i64>,
) -> TokenSpec {
    let (cert_pem, key_pem) = generate_cert_and_key(name, serial, not_before_unix);
    let certificate = dir.join(format!("{name}.crt"));
    let key = dir.join(format!("{name}.key"));
    std::fs::write(&certificate, cert_pem).unwrap();
    std::fs::write(&key, key_pem).unwrap();

    TokenSpec {
        name: name.to_string(),
        certificate,
        key,
        passphrase: None,
    }
}

/// Like [`write_token_files`] but the private key PEM is encrypted with
/// `passphrase`.
pub fn write_encrypted_token_files(
    dir: &Path,
    name: &str,
    serial: u32,
    passphrase: &str,
) -> TokenSpec {
    let (cert, pkey) = build_self_signed(name, serial, None);

    let certificate = dir.join(format!("{name}.crt"));
    let key = dir.join(format!("{name}.key"));
    std::fs::write(&certificate, cert.to_pem().unwrap()).unwrap();
    std::fs::write(
        &key,
        pkey.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .unwrap(),
    )
    .unwrap();

    TokenSpec {
        name: name.to_string(),
        certificate,
        key,
        passphrase: Some(Zeroizing::new(passphrase.to_string())),
    }
}

pub fn load_token(dir: &Path, name: &str, serial: u32, not_before_unix: Option<i64>) -> Token {
    Token::load(&write_token_files(dir, name, serial, not_before_unix)).unwrap()
}

fn build_self_signed(
    cn: &str,
    serial: u32,
    not_before_unix: Option<i64>,
) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("C", "US").unwrap();
    name.append_entry_by_text("O", "Skeep Test").unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    let not_before = match not_before_unix {
        Some(stamp) => Asn1Time::from_unix(stamp).unwrap(),
        None => Asn1Time::days_from_now(0).unwrap(),
    };
    builder.set_not_before(&not_before).unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
        .unwrap();

    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    (builder.build(), pkey)
}

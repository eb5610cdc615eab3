//! CMS recipient identification.
//!
//! An EnvelopedData structure names each recipient by issuer and serial.
//! Both sides of the comparison reduce to raw bytes: the issuer's DER
//! encoding and the serial's minimal big-endian form, so the write path
//! (openssl) and the parse path agree without string normalization.

use cms::content_info::ContentInfo;
use cms::enveloped_data::{EnvelopedData, RecipientIdentifier, RecipientInfo};
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};

use crate::certinfo::minimal_serial;
use crate::error::KeyError;

const ID_ENVELOPED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");

/// `(issuer, serial)` pair in canonical byte form. The key of the
/// catalog's recipient index.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RecipientId {
    issuer_der: Vec<u8>,
    serial: Vec<u8>,
}

impl RecipientId {
    pub fn new(issuer_der: Vec<u8>, serial: &[u8]) -> RecipientId {
        RecipientId {
            issuer_der,
            serial: minimal_serial(serial),
        }
    }
}

/// Enumerate the `issuerAndSerialNumber` recipients of a PEM CMS envelope,
/// in the order the envelope lists them.
///
/// Recipients identified by subjectKeyIdentifier are skipped; callers fall
/// back to brute-force decryption when nothing matches.
pub fn parse_recipient_ids(envelope_pem: &[u8]) -> Result<Vec<RecipientId>, KeyError> {
    let (label, der_bytes) = pem_rfc7468::decode_vec(envelope_pem)?;
    if label != "CMS" && label != "PKCS7" {
        return Err(KeyError::UnexpectedPem {
            expected: "CMS",
            found: label.to_string(),
        });
    }

    let content_info = ContentInfo::from_der(&der_bytes)?;
    if content_info.content_type != ID_ENVELOPED_DATA {
        return Err(KeyError::NotEnvelopedData(
            content_info.content_type.to_string(),
        ));
    }

    let enveloped = content_info.content.decode_as::<EnvelopedData>()?;

    let mut recipients = Vec::new();
    for info in enveloped.recip_infos.0.iter() {
        if let RecipientInfo::Ktri(ktri) = info {
            if let RecipientIdentifier::IssuerAndSerialNumber(ias) = &ktri.rid {
                recipients.push(RecipientId::new(
                    ias.issuer.to_der()?,
                    ias.serial_number.as_bytes(),
                ));
            }
        }
    }

    Ok(recipients)
}

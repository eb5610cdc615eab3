//! Structured metadata extracted from a recipient certificate.
//!
//! Everything a caller needs to index, display, or route to a token comes
//! from one parse of the certificate DER. Names render in certificate order
//! joined with `", "`, serials as upper-case colon-separated hex, validity
//! bounds as 14-digit `YYYYMMDDHHMMSS` UTC strings.

use data_encoding::BASE64;
use der::Encode;
use der::oid::AssociatedOid;
use num_bigint::BigUint;
use x509_cert::Certificate;
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::name::DistributionPointName;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints, IssuerAltName, KeyUsage,
    KeyUsages, SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::name::Name;

use crate::error::KeyError;

#[derive(Debug, Clone)]
pub struct CertInfo {
    /// X.509 version number (3 for a v3 certificate)
    pub version: u32,
    pub subject: String,
    pub issuer: String,
    /// Upper-case colon-separated hex, always an even digit count
    pub serial_hex: String,
    pub serial: BigUint,
    /// `YYYYMMDDHHMMSS` in UTC
    pub not_before: String,
    pub not_after: String,
    /// Base64 of the SubjectPublicKeyInfo DER
    pub public_key: String,
    /// Base64 of the full certificate DER
    pub certificate: String,
    /// SHA-1 over the certificate DER, colon-separated upper-case hex
    pub fingerprint: String,
    pub subject_alt_name: Option<String>,
    pub issuer_alt_name: Option<String>,
    pub basic_constraints: Option<String>,
    pub subject_key_id: Option<String>,
    pub authority_key_id: Option<String>,
    pub crl_distribution_points: Option<String>,
    pub key_usage: Option<String>,

    // Index material for CMS issuerAndSerialNumber matching
    pub(crate) issuer_der: Vec<u8>,
    pub(crate) serial_bytes: Vec<u8>,
}

impl CertInfo {
    pub fn from_pem(pem: &[u8]) -> Result<CertInfo, KeyError> {
        let (label, der_bytes) = pem_rfc7468::decode_vec(pem)?;
        if label != "CERTIFICATE" {
            return Err(KeyError::UnexpectedPem {
                expected: "CERTIFICATE",
                found: label.to_string(),
            });
        }
        Self::from_der(&der_bytes)
    }

    pub fn from_der(der_bytes: &[u8]) -> Result<CertInfo, KeyError> {
        use der::Decode;

        let cert = Certificate::from_der(der_bytes)?;
        let tbs = &cert.tbs_certificate;

        let subject = format_name(&tbs.subject);
        if subject.is_empty() {
            return Err(KeyError::MissingField("subject name"));
        }
        let issuer = format_name(&tbs.issuer);
        if issuer.is_empty() {
            return Err(KeyError::MissingField("issuer name"));
        }

        let serial_raw = tbs.serial_number.as_bytes();
        if serial_raw.first().is_some_and(|b| b & 0x80 != 0) {
            return Err(KeyError::BadSerial);
        }
        let serial_bytes = minimal_serial(serial_raw);

        let not_before = compact_time(tbs.validity.not_before.to_unix_duration().as_secs())?;
        let not_after = compact_time(tbs.validity.not_after.to_unix_duration().as_secs())?;
        if not_before > not_after {
            return Err(KeyError::InvertedValidity);
        }

        let mut info = CertInfo {
            version: match tbs.version {
                x509_cert::Version::V1 => 1,
                x509_cert::Version::V2 => 2,
                x509_cert::Version::V3 => 3,
            },
            subject,
            issuer,
            serial_hex: colon_hex(&serial_bytes),
            serial: BigUint::from_bytes_be(&serial_bytes),
            not_before,
            not_after,
            public_key: BASE64.encode(&tbs.subject_public_key_info.to_der()?),
            certificate: BASE64.encode(der_bytes),
            fingerprint: colon_hex(&openssl::sha::sha1(der_bytes)),
            subject_alt_name: None,
            issuer_alt_name: None,
            basic_constraints: None,
            subject_key_id: None,
            authority_key_id: None,
            crl_distribution_points: None,
            key_usage: None,
            issuer_der: tbs.issuer.to_der()?,
            serial_bytes,
        };

        if let Some(extensions) = &tbs.extensions {
            for ext in extensions {
                info.apply_extension(ext)?;
            }
        }

        Ok(info)
    }

    fn apply_extension(&mut self, ext: &Extension) -> Result<(), KeyError> {
        use der::Decode;

        let value = ext.extn_value.as_bytes();
        let oid = ext.extn_id;

        if oid == SubjectAltName::OID {
            let san = SubjectAltName::from_der(value)?;
            self.subject_alt_name = Some(format_general_names(&san.0));
        } else if oid == IssuerAltName::OID {
            let ian = IssuerAltName::from_der(value)?;
            self.issuer_alt_name = Some(format_general_names(&ian.0));
        } else if oid == BasicConstraints::OID {
            let bc = BasicConstraints::from_der(value)?;
            let mut text = format!("CA:{}", if bc.ca { "TRUE" } else { "FALSE" });
            if let Some(depth) = bc.path_len_constraint {
                text.push_str(&format!(", pathlen:{depth}"));
            }
            self.basic_constraints = Some(text);
        } else if oid == SubjectKeyIdentifier::OID {
            let ski = SubjectKeyIdentifier::from_der(value)?;
            self.subject_key_id = Some(colon_hex(ski.0.as_bytes()));
        } else if oid == AuthorityKeyIdentifier::OID {
            let aki = AuthorityKeyIdentifier::from_der(value)?;
            if let Some(key_id) = aki.key_identifier {
                self.authority_key_id = Some(format!("keyid:{}", colon_hex(key_id.as_bytes())));
            }
        } else if oid == CrlDistributionPoints::OID {
            let cdp = CrlDistributionPoints::from_der(value)?;
            let mut points = Vec::new();
            for dp in &cdp.0 {
                if let Some(DistributionPointName::FullName(names)) = &dp.distribution_point {
                    points.push(format_general_names(names));
                }
            }
            if !points.is_empty() {
                self.crl_distribution_points = Some(points.join(", "));
            }
        } else if oid == KeyUsage::OID {
            let ku = KeyUsage::from_der(value)?;
            self.key_usage = Some(format_key_usage(&ku));
        }

        Ok(())
    }
}

/// Render a DN with components in certificate order: `C=US, O=Acme, CN=vault`.
pub(crate) fn format_name(name: &Name) -> String {
    name.0
        .iter()
        .map(|rdn| {
            rdn.0
                .iter()
                .map(|atv| atv.to_string())
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip the sign-padding zero octets DER prepends to positive INTEGERs.
pub(crate) fn minimal_serial(raw: &[u8]) -> Vec<u8> {
    let start = raw
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(raw.len().saturating_sub(1));
    raw[start..].to_vec()
}

pub(crate) fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn compact_time(unix_secs: u64) -> Result<String, KeyError> {
    let ts = jiff::Timestamp::from_second(unix_secs as i64)?;
    Ok(ts.strftime("%Y%m%d%H%M%S").to_string())
}

fn format_general_names(names: &[GeneralName]) -> String {
    names
        .iter()
        .map(format_general_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_general_name(name: &GeneralName) -> String {
    match name {
        GeneralName::Rfc822Name(addr) => format!("email:{}", addr.as_str()),
        GeneralName::DnsName(dns) => format!("DNS:{}", dns.as_str()),
        GeneralName::UniformResourceIdentifier(uri) => format!("URI:{}", uri.as_str()),
        GeneralName::IpAddress(octets) => format!("IP Address:{}", format_ip(octets.as_bytes())),
        GeneralName::DirectoryName(dn) => format!("DirName:{}", format_name(dn)),
        GeneralName::RegisteredId(oid) => format!("RID:{oid}"),
        GeneralName::OtherName(_) => "othername:<unsupported>".to_string(),
        GeneralName::EdiPartyName(_) => "EdiPartyName:<unsupported>".to_string(),
    }
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("."),
        16 => bytes
            .chunks(2)
            .map(|pair| format!("{:X}", u16::from_be_bytes([pair[0], pair[1]])))
            .collect::<Vec<_>>()
            .join(":"),
        _ => colon_hex(bytes),
    }
}

fn format_key_usage(ku: &KeyUsage) -> String {
    ku.0.into_iter()
        .map(|usage| match usage {
            KeyUsages::DigitalSignature => "digitalSignature",
            KeyUsages::NonRepudiation => "nonRepudiation",
            KeyUsages::KeyEncipherment => "keyEncipherment",
            KeyUsages::DataEncipherment => "dataEncipherment",
            KeyUsages::KeyAgreement => "keyAgreement",
            KeyUsages::KeyCertSign => "keyCertSign",
            KeyUsages::CRLSign => "cRLSign",
            KeyUsages::EncipherOnly => "encipherOnly",
            KeyUsages::DecipherOnly => "decipherOnly",
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::generate_cert_and_key;

    #[test]
    fn parses_a_generated_certificate() {
        let (cert_pem, _key_pem) = generate_cert_and_key("vault", 7, None);
        let info = CertInfo::from_pem(&cert_pem).unwrap();

        assert_eq!(info.version, 3);
        assert!(info.subject.contains("CN=vault"), "{}", info.subject);
        assert_eq!(info.subject, info.issuer);
        assert_eq!(info.serial, BigUint::from(7u32));
        assert_eq!(info.serial_hex, "07");
        assert_eq!(info.not_before.len(), 14);
        assert_eq!(info.not_after.len(), 14);
        assert!(info.not_before <= info.not_after);
        assert!(info.not_before.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(info.fingerprint.len(), 20 * 3 - 1);
        assert!(!info.public_key.is_empty());
        assert!(!info.certificate.is_empty());
    }

    #[test]
    fn fingerprint_matches_openssl_digest() {
        let (cert_pem, _) = generate_cert_and_key("fp", 1, None);
        let info = CertInfo::from_pem(&cert_pem).unwrap();

        let cert = openssl::x509::X509::from_pem(&cert_pem).unwrap();
        let digest = cert
            .digest(openssl::hash::MessageDigest::sha1())
            .unwrap();
        assert_eq!(info.fingerprint, colon_hex(&digest));
    }

    #[test]
    fn large_serials_keep_even_hex_and_value() {
        let (cert_pem, _) = generate_cert_and_key("big", 0x1234_5678, None);
        let info = CertInfo::from_pem(&cert_pem).unwrap();
        assert_eq!(info.serial_hex, "12:34:56:78");
        assert_eq!(info.serial, BigUint::from(0x1234_5678u32));
    }

    #[test]
    fn minimal_serial_strips_sign_padding() {
        assert_eq!(minimal_serial(&[0x00, 0x8f]), vec![0x8f]);
        assert_eq!(minimal_serial(&[0x07]), vec![0x07]);
        assert_eq!(minimal_serial(&[0x00]), vec![0x00]);
        assert_eq!(minimal_serial(&[0x00, 0x00, 0x01]), vec![0x01]);
    }

    #[test]
    fn colon_hex_is_upper_case_and_even() {
        assert_eq!(colon_hex(&[0x0a, 0xff, 0x00]), "0A:FF:00");
        assert_eq!(colon_hex(&[]), "");
    }

    #[test]
    fn compact_time_formats_utc() {
        // 2009-02-13 23:31:30 UTC
        assert_eq!(compact_time(1_234_567_890).unwrap(), "20090213233130");
        assert_eq!(compact_time(0).unwrap(), "19700101000000");
    }

    #[test]
    fn non_certificate_pem_is_rejected() {
        let pem = b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert!(matches!(
            CertInfo::from_pem(pem),
            Err(KeyError::UnexpectedPem { .. })
        ));
    }
}

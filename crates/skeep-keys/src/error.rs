#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding PEM: {0}")]
    Pem(#[from] pem_rfc7468::Error),

    #[error("expected a {expected} PEM block, found {found}")]
    UnexpectedPem {
        expected: &'static str,
        found: String,
    },

    #[error("parsing certificate: {0}")]
    CertParse(#[from] der::Error),

    #[error("certificate is missing {0}")]
    MissingField(&'static str),

    #[error("certificate serial number is negative")]
    BadSerial,

    #[error("certificate NotBefore is after NotAfter")]
    InvertedValidity,

    #[error("invalid timestamp in certificate: {0}")]
    Time(#[from] jiff::Error),

    #[error("{0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("no token available for encryption")]
    NoEncryptionToken,

    #[error("not a CMS enveloped-data structure ({0})")]
    NotEnvelopedData(String),
}

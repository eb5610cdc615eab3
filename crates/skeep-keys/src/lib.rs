//! Token material for the skeep daemon: recipient certificates and their
//! private keys, the catalogue that indexes them, and the CMS envelope
//! operations the persistent store is built on.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod certinfo;
pub mod envelope;
mod error;
pub mod recipient;
pub mod token;

pub use error::KeyError;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

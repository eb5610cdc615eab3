use crate::error::Error;
use crate::error::Error::{InvalidSyntax, UnknownCommand};

/// A parsed request line.
///
/// Both the verb and the key must match `[A-Za-z0-9_]+`. Anything else on
/// the line is a syntax error; a well-formed line with a verb other than
/// `get` or `set` is an unknown command (the two are distinguished on the
/// wire: `CLIENT_ERROR invalid syntax` vs `ERROR`).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    /// Fetch the plaintext of a secret
    Get(String),
    /// Replace the value of a secret with the bytes that follow the line
    Set(String),
}

impl Command {
    pub fn parse(line: &[u8]) -> Result<Command, Error> {
        let line = std::str::from_utf8(line).map_err(|_| InvalidSyntax)?;

        let mut words = line.split_ascii_whitespace();
        let (verb, key) = match (words.next(), words.next(), words.next()) {
            (Some(verb), Some(key), None) => (verb, key),
            _ => return Err(InvalidSyntax),
        };

        if !is_word(verb) || !is_word(key) {
            return Err(InvalidSyntax);
        }

        match verb {
            "get" => Ok(Command::Get(key.to_string())),
            "set" => Ok(Command::Set(key.to_string())),
            other => Err(UnknownCommand(other.to_string())),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Get(key) => key,
            Command::Set(key) => key,
        }
    }
}

/// True iff `key` is a legal secret name: `[A-Za-z0-9_]+`.
///
/// The same check gates both verbs, so no key containing a path separator
/// (or anything else surprising) ever reaches the storage layer.
pub fn is_valid_key(key: &str) -> bool {
    is_word(key)
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

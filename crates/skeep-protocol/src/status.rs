/// Status lines the server writes back. `get` hits answer with raw secret
/// bytes instead; `get` misses answer with nothing at all.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Stored,
    NotStored,
    Error,
    InvalidSyntax,
    AccessDenied,
}

impl Status {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Status::Stored => b"STORED\r\n",
            Status::NotStored => b"NOT_STORED\r\n",
            Status::Error => b"ERROR\r\n",
            Status::InvalidSyntax => b"CLIENT_ERROR invalid syntax\r\n",
            Status::AccessDenied => b"CLIENT_ERROR access denied\r\n",
        }
    }

    /// Parse a status line as read by a client (terminator stripped).
    pub fn from_line(line: &str) -> Option<Status> {
        match line {
            "STORED" => Some(Status::Stored),
            "NOT_STORED" => Some(Status::NotStored),
            "ERROR" => Some(Status::Error),
            "CLIENT_ERROR invalid syntax" => Some(Status::InvalidSyntax),
            "CLIENT_ERROR access denied" => Some(Status::AccessDenied),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_round_trip_through_from_line() {
        for status in [
            Status::Stored,
            Status::NotStored,
            Status::Error,
            Status::InvalidSyntax,
            Status::AccessDenied,
        ] {
            let text = std::str::from_utf8(status.as_bytes()).unwrap();
            assert_eq!(Status::from_line(text.trim_end()), Some(status));
        }
    }

    #[test]
    fn unknown_lines_are_none() {
        assert_eq!(Status::from_line("SERVER_ERROR oops"), None);
    }
}

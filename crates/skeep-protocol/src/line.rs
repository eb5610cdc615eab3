use std::io::BufRead;

use crate::error::Error;

/// Longest acceptable command line, terminator excluded. Secret names are
/// short; anything beyond this is a client speaking a different protocol.
pub const MAX_LINE: usize = 1024;

/// Read one request line, terminated by CR, LF, or CRLF.
///
/// Returns the line without its terminator. A CR followed by an LF consumes
/// both bytes; a bare CR consumes only itself, so a binary `set` body
/// beginning with a non-LF byte is left untouched in the reader. EOF before
/// any terminator yields the bytes read so far.
pub fn read_request_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut line = Vec::with_capacity(64);

    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(line);
        }

        match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                let terminator = buf[pos];
                line.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);

                if terminator == b'\r' {
                    let rest = reader.fill_buf()?;
                    if rest.first() == Some(&b'\n') {
                        reader.consume(1);
                    }
                }

                if line.len() > MAX_LINE {
                    return Err(Error::InvalidSyntax);
                }
                return Ok(line);
            }
            None => {
                let n = buf.len();
                line.extend_from_slice(buf);
                reader.consume(n);

                if line.len() > MAX_LINE {
                    return Err(Error::InvalidSyntax);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use super::*;

    fn line_and_rest(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut reader = BufReader::new(Cursor::new(input.to_vec()));
        let line = read_request_line(&mut reader).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        (line, rest)
    }

    #[test]
    fn all_three_terminators_are_accepted() {
        for input in [b"set k\n".as_slice(), b"set k\r", b"set k\r\n"] {
            let (line, rest) = line_and_rest(input);
            assert_eq!(line, b"set k");
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn body_bytes_are_untouched() {
        let (line, rest) = line_and_rest(b"set k\r\n\x00\x01\xff binary \r\n value");
        assert_eq!(line, b"set k");
        assert_eq!(rest, b"\x00\x01\xff binary \r\n value");
    }

    #[test]
    fn bare_cr_does_not_eat_the_body() {
        let (line, rest) = line_and_rest(b"set k\rvalue");
        assert_eq!(line, b"set k");
        assert_eq!(rest, b"value");
    }

    #[test]
    fn crlf_split_is_consumed_whole() {
        // An LF-leading body after CR would be ambiguous; CRLF always counts
        // as a single terminator.
        let (line, rest) = line_and_rest(b"set k\r\n\nbody");
        assert_eq!(line, b"set k");
        assert_eq!(rest, b"\nbody");
    }

    #[test]
    fn eof_terminates_the_line() {
        let (line, rest) = line_and_rest(b"get k");
        assert_eq!(line, b"get k");
        assert!(rest.is_empty());
    }

    #[test]
    fn oversize_line_is_rejected() {
        let mut input = vec![b'a'; MAX_LINE + 1];
        input.push(b'\n');
        let mut reader = BufReader::new(Cursor::new(input));
        assert!(matches!(
            read_request_line(&mut reader),
            Err(Error::InvalidSyntax)
        ));
    }

    #[test]
    fn line_at_the_limit_is_accepted() {
        let mut input = vec![b'a'; MAX_LINE];
        input.push(b'\n');
        let mut reader = BufReader::new(Cursor::new(input));
        assert_eq!(read_request_line(&mut reader).unwrap().len(), MAX_LINE);
    }
}

//! Wire format of the skeep Unix-socket secret protocol.
//!
//! A connection is a one-shot transaction: one command line in (terminated
//! by CR, LF, or CRLF), an optional binary body in (`set` only, read to
//! EOF), and either raw secret bytes or a status line out.

#![forbid(unsafe_code)]

mod command;
mod error;
mod line;
mod status;

pub use command::{Command, is_valid_key};
pub use error::Error;
pub use line::{MAX_LINE, read_request_line};
pub use status::Status;

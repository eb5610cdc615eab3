#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed request line")]
    InvalidSyntax,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

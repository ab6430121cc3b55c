use std::fmt;

/// The client-visible error kinds a command may raise.
///
/// Every variant is surfaced to the client as a single RESP error frame;
/// none of them ever leave state partially mutated (argument validation
/// completes fully before any write to the key space).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    /// Malformed option list, unknown flag, bad arity, conflicting flags.
    #[error("ERR syntax error: {0}")]
    Syntax(String),
    /// Failed numeric decode, non-positive expire duration, NaN score. The
    /// inner string carries the full message, since it may describe an
    /// integer, a float, or a duration depending on the call site.
    #[error("ERR {0}")]
    Value(String),
    /// An operation applied to a value of the wrong variant.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    /// Dispatcher lookup miss.
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

/// Top-level error type for the server. `DbError` covers command-level
/// failures; the other variants cover I/O and protocol framing, which
/// terminate the connection rather than producing a RESP error reply.
#[derive(Debug)]
pub enum Error {
    /// A command failed validation or application against the key space.
    Db(DbError),
    /// The RESP frame on the wire was malformed. This terminates the
    /// connection rather than producing an error reply.
    Protocol(String),
    /// I/O failure reading/writing a socket or the append log.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Db(e) => write!(f, "{e}"),
            Error::Protocol(e) => write!(f, "protocol error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        Error::Db(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

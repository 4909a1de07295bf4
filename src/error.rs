//! Error types surfaced to clients.
//!
//! Every variant's `Display` form is the exact message written to the wire
//! (`-ERR <msg>` in RESP, `"err"` in JSON). Command handlers return
//! `Result<Reply, Error>`; errors are never logged to the append-only file.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("wrong number of arguments for '{0}' command")]
    ArgCount(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid argument '{0}'")]
    InvalidArgument(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("id not found")]
    IdNotFound,

    #[error("path not found")]
    PathNotFound,

    #[error("read only")]
    ReadOnly,

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    #[error("no longer following")]
    NoLongerFollowing,

    #[error("catching up to leader")]
    CatchingUp,

    #[error("timeout")]
    Timeout,

    #[error("equal bearings ({0} == {0}), use CIRCLE instead")]
    EqualBearings(String),

    #[error("invalid aof file")]
    InvalidAof,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid password")]
    InvalidPassword,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that may legitimately occur while replaying a log prefix and
    /// must not abort the replay.
    pub fn harmless_in_replay(&self) -> bool {
        matches!(self, Error::KeyNotFound | Error::IdNotFound)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_wire_format() {
        assert_eq!(
            Error::ArgCount("set".into()).to_string(),
            "wrong number of arguments for 'set' command"
        );
        assert_eq!(
            Error::UnknownCommand("blorp".into()).to_string(),
            "unknown command 'blorp'"
        );
        assert_eq!(
            Error::EqualBearings("90".into()).to_string(),
            "equal bearings (90 == 90), use CIRCLE instead"
        );
        assert_eq!(
            Error::OutOfMemory.to_string(),
            "OOM command not allowed when used memory > 'maxmemory'"
        );
    }

    #[test]
    fn replay_tolerance() {
        assert!(Error::KeyNotFound.harmless_in_replay());
        assert!(Error::IdNotFound.harmless_in_replay());
        assert!(!Error::UnknownCommand("x".into()).harmless_in_replay());
    }
}

//! Error types for fsmonitor-core.

use thiserror::Error;

/// All errors that can arise at the protocol parse boundary.
///
/// Every variant is fatal at the daemon level: the `Display` string becomes
/// the wire `ERROR` message sent before shutdown.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Keyword not in the protocol vocabulary.
    #[error("unknown command: {keyword}")]
    UnknownCommand { keyword: String },

    /// Known keyword, wrong number of arguments.
    #[error("incorrect number of arguments for {keyword}: {args:?}")]
    BadArity { keyword: String, args: Vec<String> },

    /// A percent-escaped argument could not be decoded.
    #[error("unable to decode command argument {arg:?}")]
    BadEscape { arg: String },

    /// Empty input line where a command keyword was expected.
    #[error("empty command line")]
    EmptyLine,
}

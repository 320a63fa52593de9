use thiserror::Error;

use fsmonitor_core::ProtocolError;

/// Error surface for the monitor runtime.
///
/// Every variant is fatal: the `Display` string is sent to the caller as an
/// `ERROR` reply before the daemon shuts down.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("I/O error at {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unknown replica: {name}")]
    UnknownReplica { name: String },

    #[error("unexpected {keyword} command in START mode")]
    CollectingMode { keyword: &'static str },

    #[error("unexpected {keyword} command")]
    UnexpectedCommand { keyword: &'static str },

    #[error("link following is not supported with unison-fsmonitor; disable this option with '-links'")]
    LinksUnsupported,

    #[error("version handshake failed: {0}")]
    Handshake(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> MonitorError {
    MonitorError::Io {
        context: context.into(),
        source,
    }
}

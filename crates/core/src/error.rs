use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by the list-watch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network, auth or connection failure talking to the API server.
    #[error("transport: {0}")]
    Transport(#[source] BoxError),
    /// Payload is not the expected resource type or collection shape.
    #[error("decode {kind}: {reason}")]
    Decode { kind: String, reason: String },
    /// The server no longer holds history for the requested version (410 Gone).
    #[error("expired: {0}")]
    Expired(String),
    /// Invalid selector or option, detected before any I/O.
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn transport(err: impl Into<BoxError>) -> Self { Error::Transport(err.into()) }

    pub fn decode(kind: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::Decode { kind: kind.to_string(), reason: reason.into() }
    }

    /// True when the caller has to re-list before watching again.
    pub fn is_expired(&self) -> bool { matches!(self, Error::Expired(_)) }
}

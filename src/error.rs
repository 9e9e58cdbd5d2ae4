use std::io;
use thiserror::Error;

/// Errors surfaced by the middleware and its responders.
#[derive(Debug, Error)]
pub enum Error {
    /// The compressor could not be constructed from the configured
    /// parameters. Raised before any response event is forwarded.
    #[error("invalid compression parameters")]
    Config(#[source] io::Error),

    /// An exclusion pattern failed to compile. Raised when the middleware is
    /// built, never per request.
    #[error("invalid exclusion pattern `{pattern}`")]
    Pattern {
        /// The pattern as configured.
        pattern: String,
        /// The underlying compile error.
        #[source]
        source: regex::Error,
    },

    /// The wrapped handler violated the event ordering contract, e.g. a
    /// second `ResponseStart` or a body chunk before any start.
    #[error("response protocol violation: {0}")]
    Protocol(&'static str),

    /// The codec failed while compressing. Fatal for the request; no partial
    /// compressed body may be delivered.
    #[error("compression failed")]
    Codec(#[from] io::Error),

    /// The underlying transport is no longer accepting events.
    #[error("transport closed")]
    TransportClosed,
}

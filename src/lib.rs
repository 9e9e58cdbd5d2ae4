//! Event-driven HTTP middleware that compresses response bodies with Zstandard.
//!
//! The middleware sits between a handler and its transport, intercepting the
//! outgoing event sequence (`ResponseStart`, then body chunks) and rewriting
//! it into a compressed one without ever buffering a whole streamed response.
//!
//! # Example
//!
//! ```ignore
//! use zstd_middleware::{CompressionConfig, CompressionMiddleware};
//!
//! let middleware = CompressionMiddleware::new(my_app, CompressionConfig::new())?;
//! middleware.handle(&request, &mut transport).await?;
//! ```
//!
//! # Compression rules
//!
//! The middleware will **not** compress responses when:
//! - The request is not HTTP, or its path matches an exclusion pattern
//! - The raw `Accept-Encoding` value contains neither `zstd` nor `gzip`
//! - The handler already set a `Content-Encoding` header
//! - The body arrives as a single complete chunk below the minimum size
//!   (default: 500 bytes)
//!
//! # Response modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to the codec used
//! - `Content-Length` is recomputed for complete bodies and removed for
//!   streamed ones, whose compressed size is unknown up front
//! - `Vary` gains an `Accept-Encoding` entry
//!
//! Streamed bodies are block-flushed chunk by chunk, so clients can decode
//! everything received so far; the terminal chunk closes the frame and writes
//! the checksum trailer when configured.

#![deny(missing_docs)]

mod channel;
mod config;
mod error;
#[cfg(feature = "gzip")]
mod gzip;
mod headers;
mod middleware;
mod responder;

pub use channel::{Event, EventSink, Handler, Protocol, Request};
pub use config::{CompressionConfig, DEFAULT_MIN_SIZE};
pub use error::Error;
#[cfg(feature = "gzip")]
pub use gzip::GzipResponder;
pub use middleware::CompressionMiddleware;
pub use responder::ZstdResponder;

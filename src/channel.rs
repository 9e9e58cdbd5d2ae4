use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

/// An outgoing response event produced by a handler.
///
/// A well-formed response is exactly one [`Event::ResponseStart`] followed by
/// zero or more [`Event::BodyChunk`]s, the last of which has `more = false`.
#[derive(Debug, Clone)]
pub enum Event {
    /// Response status line and headers. Must precede any body chunk.
    ResponseStart {
        /// HTTP status code.
        status: http::StatusCode,
        /// Response headers. Duplicates are allowed (e.g. multiple
        /// `Set-Cookie`) and order is preserved.
        headers: HeaderMap,
    },
    /// A piece of the response body.
    BodyChunk {
        /// Body bytes for this chunk. May be empty.
        data: Bytes,
        /// `true` while further chunks follow; `false` on the terminal chunk.
        more: bool,
    },
}

/// Receiver side of the outgoing event channel.
///
/// Implemented by transports that deliver events to the client, and by
/// responders that rewrite events before forwarding them to an inner sink.
#[async_trait]
pub trait EventSink: Send {
    /// Accepts the next outgoing event.
    ///
    /// Errors are fatal for the request: callers must stop sending and tear
    /// the connection down rather than continue with a corrupt stream.
    async fn send(&mut self, event: Event) -> Result<(), Error>;
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for &mut S {
    async fn send(&mut self, event: Event) -> Result<(), Error> {
        (**self).send(event).await
    }
}

/// Protocol of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// A plain HTTP request/response exchange.
    Http,
    /// A WebSocket handshake; responses are never compressed.
    WebSocket,
}

/// The inbound half of a request: everything a middleware needs to decide how
/// to treat the response, without the body.
#[derive(Debug, Clone)]
pub struct Request {
    /// Protocol of this request.
    pub protocol: Protocol,
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

impl Request {
    /// Creates an HTTP request with the given method and target.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            protocol: Protocol::Http,
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header, replacing any previous value with the same name.
    pub fn header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the raw `Accept-Encoding` value, or `""` when absent or not
    /// valid UTF-8.
    pub fn accept_encoding(&self) -> &str {
        self.headers
            .get(http::header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// An application that produces a response for a request by pushing events
/// into the provided sink.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one request, sending the full response through `send`.
    async fn call(&self, request: &Request, send: &mut dyn EventSink) -> Result<(), Error>;
}

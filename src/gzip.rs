use crate::channel::{Event, EventSink};
use crate::error::Error;
use crate::headers::{add_vary_accept_encoding, has_content_encoding};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{self, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::io::Write;
use std::mem;

// Matches the compression level of the gzip responders this one stands in for.
const GZIP_LEVEL: u32 = 9;

/// Fallback responder for clients that accept `gzip` but not `zstd`.
///
/// Runs the same per-request state machine as [`crate::ZstdResponder`]: the
/// start event is held until the first chunk, complete bodies below the
/// threshold pass untouched, complete bodies are emitted as one finished gzip
/// member with a recomputed `Content-Length`, and incomplete bodies stream
/// with sync flushes until the terminal chunk writes the trailer.
pub struct GzipResponder<S> {
    sink: S,
    min_size: usize,
    encoder: Option<GzEncoder<Vec<u8>>>,
    pending: Option<(StatusCode, HeaderMap)>,
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HoldingStart { passthrough: bool },
    PassThrough,
    Streaming,
    Done,
}

impl<S: EventSink> GzipResponder<S> {
    /// Creates a responder that forwards transformed events into `sink`.
    pub fn new(sink: S, min_size: usize) -> Self {
        Self {
            sink,
            min_size,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL))),
            pending: None,
            state: State::Idle,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.encoder.as_mut() {
            Some(encoder) => Ok(encoder.write_all(data)?),
            None => Err(Error::Protocol("write after compressor finalized")),
        }
    }

    fn block_flush(&mut self) -> Result<Bytes, Error> {
        match self.encoder.as_mut() {
            Some(encoder) => {
                encoder.flush()?;
                Ok(Bytes::from(mem::take(encoder.get_mut())))
            }
            None => Err(Error::Protocol("flush after compressor finalized")),
        }
    }

    fn frame_flush(&mut self) -> Result<Bytes, Error> {
        match self.encoder.take() {
            Some(encoder) => Ok(Bytes::from(encoder.finish()?)),
            None => Err(Error::Protocol("compressor finalized twice")),
        }
    }

    fn take_start(&mut self) -> Result<(StatusCode, HeaderMap), Error> {
        self.pending
            .take()
            .ok_or(Error::Protocol("missing buffered response start"))
    }
}

#[async_trait]
impl<S: EventSink> EventSink for GzipResponder<S> {
    async fn send(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::ResponseStart { status, headers } => {
                if self.state != State::Idle {
                    return Err(Error::Protocol("unexpected second response start"));
                }
                let passthrough = has_content_encoding(&headers);
                self.pending = Some((status, headers));
                self.state = State::HoldingStart { passthrough };
                Ok(())
            }
            Event::BodyChunk { data, more } => match self.state {
                State::Idle => Err(Error::Protocol("body chunk before response start")),
                State::Done => Err(Error::Protocol("body chunk after final chunk")),
                State::HoldingStart { passthrough: true } => {
                    self.encoder = None;
                    let (status, headers) = self.take_start()?;
                    self.state = if more { State::PassThrough } else { State::Done };
                    self.sink
                        .send(Event::ResponseStart { status, headers })
                        .await?;
                    self.sink.send(Event::BodyChunk { data, more }).await
                }
                State::PassThrough => {
                    if !more {
                        self.state = State::Done;
                    }
                    self.sink.send(Event::BodyChunk { data, more }).await
                }
                State::HoldingStart { passthrough: false } => {
                    if !more && data.len() < self.min_size {
                        self.encoder = None;
                        let (status, headers) = self.take_start()?;
                        self.state = State::Done;
                        self.sink
                            .send(Event::ResponseStart { status, headers })
                            .await?;
                        self.sink.send(Event::BodyChunk { data, more }).await
                    } else if !more {
                        self.write(&data)?;
                        let body = self.frame_flush()?;
                        let (status, mut headers) = self.take_start()?;
                        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                        add_vary_accept_encoding(&mut headers);
                        self.state = State::Done;
                        self.sink
                            .send(Event::ResponseStart { status, headers })
                            .await?;
                        self.sink
                            .send(Event::BodyChunk {
                                data: body,
                                more: false,
                            })
                            .await
                    } else {
                        self.write(&data)?;
                        let body = self.block_flush()?;
                        let (status, mut headers) = self.take_start()?;
                        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                        headers.remove(header::CONTENT_LENGTH);
                        add_vary_accept_encoding(&mut headers);
                        self.state = State::Streaming;
                        self.sink
                            .send(Event::ResponseStart { status, headers })
                            .await?;
                        self.sink
                            .send(Event::BodyChunk {
                                data: body,
                                more: true,
                            })
                            .await
                    }
                }
                State::Streaming => {
                    self.write(&data)?;
                    if more {
                        let body = self.block_flush()?;
                        self.sink
                            .send(Event::BodyChunk {
                                data: body,
                                more: true,
                            })
                            .await
                    } else {
                        let body = self.frame_flush()?;
                        self.state = State::Done;
                        self.sink
                            .send(Event::BodyChunk {
                                data: body,
                                more: false,
                            })
                            .await
                    }
                }
            },
        }
    }
}

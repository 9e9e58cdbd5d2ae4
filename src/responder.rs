use crate::channel::{Event, EventSink};
use crate::config::CompressionConfig;
use crate::error::Error;
use crate::headers::{add_vary_accept_encoding, has_content_encoding};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::io::Write;
use std::mem;
use tracing::trace;
use zstd::stream::write::Encoder;

/// Per-request responder that rewrites an outgoing event sequence into a
/// zstd-compressed one.
///
/// The responder buffers the `ResponseStart` event until the first body chunk
/// arrives, because only that chunk reveals which path applies:
///
/// - a complete body below the size threshold is forwarded untouched,
/// - a complete body at or above it is compressed as one finished frame with
///   a recomputed `Content-Length`,
/// - an incomplete body switches to streaming: `Content-Length` is dropped,
///   and every chunk is compressed and block-flushed so the client can decode
///   what it has received so far. The frame is closed on the terminal chunk.
///
/// A response that already carries `Content-Encoding` is forwarded verbatim;
/// that decision is made once, at `ResponseStart`, and never revisited.
pub struct ZstdResponder<S> {
    sink: S,
    min_size: usize,
    encoder: Option<Encoder<'static, Vec<u8>>>,
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

impl<S: EventSink> ZstdResponder<S> {
    /// Creates a responder that forwards transformed events into `sink`.
    ///
    /// The compressor is built here, so invalid parameters fail before any
    /// event is accepted.
    pub fn new(sink: S, config: &CompressionConfig) -> Result<Self, Error> {
        let mut encoder = Encoder::new(Vec::new(), config.level).map_err(Error::Config)?;
        encoder
            .include_checksum(config.checksum)
            .map_err(Error::Config)?;
        encoder
            .include_contentsize(config.content_size)
            .map_err(Error::Config)?;
        if config.workers > 0 {
            encoder.multithread(config.workers).map_err(Error::Config)?;
        }
        Ok(Self {
            sink,
            min_size: config.min_size,
            encoder: Some(encoder),
            pending: None,
            state: State::Idle,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.encoder.as_mut() {
            Some(encoder) => Ok(encoder.write_all(data)?),
            None => Err(Error::Protocol("write after compressor finalized")),
        }
    }

    /// Emits everything compressed so far without closing the frame.
    fn block_flush(&mut self) -> Result<Bytes, Error> {
        match self.encoder.as_mut() {
            Some(encoder) => {
                encoder.flush()?;
                Ok(Bytes::from(mem::take(encoder.get_mut())))
            }
            None => Err(Error::Protocol("flush after compressor finalized")),
        }
    }

    /// Closes the frame, returning the remaining output including the
    /// epilogue. Consumes the compressor; it can happen only once.
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
impl<S: EventSink> EventSink for ZstdResponder<S> {
    async fn send(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::ResponseStart { status, headers } => {
                if self.state != State::Idle {
                    return Err(Error::Protocol("unexpected second response start"));
                }
                // Hold the start back until the first chunk tells us how the
                // headers must change.
                let passthrough = has_content_encoding(&headers);
                self.pending = Some((status, headers));
                self.state = State::HoldingStart { passthrough };
                Ok(())
            }
            Event::BodyChunk { data, more } => match self.state {
                State::Idle => Err(Error::Protocol("body chunk before response start")),
                State::Done => Err(Error::Protocol("body chunk after final chunk")),
                State::HoldingStart { passthrough: true } => {
                    // The handler applied its own coding; never recompress.
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
                        // Complete and too small, which includes the empty
                        // body. Forward untouched.
                        self.encoder = None;
                        let (status, headers) = self.take_start()?;
                        self.state = State::Done;
                        self.sink
                            .send(Event::ResponseStart { status, headers })
                            .await?;
                        self.sink.send(Event::BodyChunk { data, more }).await
                    } else if !more {
                        // Complete body: one finished frame, exact length.
                        self.write(&data)?;
                        let body = self.frame_flush()?;
                        trace!(raw = data.len(), compressed = body.len(), "single frame");
                        let (status, mut headers) = self.take_start()?;
                        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("zstd"));
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
                        // More chunks follow: final size is unknown, so the
                        // length header has to go.
                        self.write(&data)?;
                        let body = self.block_flush()?;
                        let (status, mut headers) = self.take_start()?;
                        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("zstd"));
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
                        trace!(tail = body.len(), "closed streamed frame");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingSink;

    fn start_with(headers: &[(header::HeaderName, &'static str)]) -> Event {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        Event::ResponseStart {
            status: StatusCode::OK,
            headers: map,
        }
    }

    fn chunk(data: &[u8], more: bool) -> Event {
        Event::BodyChunk {
            data: Bytes::copy_from_slice(data),
            more,
        }
    }

    fn decode(body: &[u8]) -> Vec<u8> {
        zstd::stream::decode_all(body).unwrap()
    }

    #[tokio::test]
    async fn small_complete_body_forwarded_unchanged() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder
            .send(start_with(&[(header::CONTENT_LENGTH, "2")]))
            .await
            .unwrap();
        responder.send(chunk(b"OK", false)).await.unwrap();

        let sink = responder.sink;
        assert_eq!(sink.events.len(), 2);
        let headers = sink.start_headers();
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "2");
        assert!(headers.get(header::VARY).is_none());
        assert_eq!(sink.body(), b"OK");
    }

    #[tokio::test]
    async fn empty_body_counts_as_too_small() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(b"", false)).await.unwrap();

        let sink = responder.sink;
        assert!(sink.start_headers().get(header::CONTENT_ENCODING).is_none());
        assert!(sink.body().is_empty());
    }

    #[tokio::test]
    async fn single_shot_compresses_and_recomputes_length() {
        let body = vec![b'x'; 4000];
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder
            .send(start_with(&[(header::CONTENT_LENGTH, "4000")]))
            .await
            .unwrap();
        responder.send(chunk(&body, false)).await.unwrap();

        let sink = responder.sink;
        let headers = sink.start_headers();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "zstd");
        assert_eq!(headers.get(header::VARY).unwrap(), "accept-encoding");

        let compressed = sink.body();
        assert!(compressed.len() < 4000);
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).unwrap(),
            &compressed.len().to_string()
        );
        assert_eq!(decode(&compressed), body);
    }

    #[tokio::test]
    async fn body_exactly_at_threshold_is_compressed() {
        let body = vec![b'x'; 500];
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(&body, false)).await.unwrap();

        let sink = responder.sink;
        assert_eq!(
            sink.start_headers().get(header::CONTENT_ENCODING).unwrap(),
            "zstd"
        );
        assert_eq!(decode(&sink.body()), body);
    }

    #[tokio::test]
    async fn streaming_removes_content_length() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder
            .send(start_with(&[(header::CONTENT_LENGTH, "4000")]))
            .await
            .unwrap();
        for _ in 0..9 {
            responder.send(chunk(&[b'x'; 400], true)).await.unwrap();
        }
        responder.send(chunk(&[b'x'; 400], false)).await.unwrap();

        let sink = responder.sink;
        assert_eq!(sink.events.len(), 11);
        let headers = sink.start_headers();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "zstd");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(headers.get(header::VARY).unwrap(), "accept-encoding");

        match sink.events.last().unwrap() {
            Event::BodyChunk { more, .. } => assert!(!more),
            _ => panic!("last event is not a body chunk"),
        }
        assert_eq!(decode(&sink.body()), vec![b'x'; 4000]);
    }

    #[tokio::test]
    async fn small_first_chunk_still_streams_when_more_follow() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(b"0123456789", true)).await.unwrap();
        responder.send(chunk(b"", false)).await.unwrap();

        let sink = responder.sink;
        let headers = sink.start_headers();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "zstd");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(decode(&sink.body()), b"0123456789");
    }

    #[tokio::test]
    async fn preencoded_response_passes_through_verbatim() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder
            .send(start_with(&[
                (header::CONTENT_ENCODING, "br"),
                (header::CONTENT_LENGTH, "1200"),
            ]))
            .await
            .unwrap();
        responder.send(chunk(&[b'a'; 600], true)).await.unwrap();
        responder.send(chunk(&[b'b'; 600], false)).await.unwrap();

        let sink = responder.sink;
        let headers = sink.start_headers();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "1200");
        assert!(headers.get(header::VARY).is_none());

        let mut expected = vec![b'a'; 600];
        expected.extend_from_slice(&[b'b'; 600]);
        assert_eq!(sink.body(), expected);
    }

    #[tokio::test]
    async fn chunk_before_start_is_rejected() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        let err = responder.send(chunk(b"early", false)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        let err = responder.send(start_with(&[])).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn chunk_after_final_is_rejected() {
        let mut responder =
            ZstdResponder::new(RecordingSink::new(), &CompressionConfig::new()).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(b"OK", false)).await.unwrap();
        let err = responder.send(chunk(b"late", false)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn checksum_frames_still_decode() {
        let body = vec![b'x'; 2000];
        let config = CompressionConfig::new().checksum(true);
        let mut responder = ZstdResponder::new(RecordingSink::new(), &config).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(&body, false)).await.unwrap();
        assert_eq!(decode(&responder.sink.body()), body);
    }

    #[tokio::test]
    async fn negative_level_selects_fast_mode() {
        let body = vec![b'x'; 2000];
        let config = CompressionConfig::new().level(-5);
        let mut responder = ZstdResponder::new(RecordingSink::new(), &config).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(&body, false)).await.unwrap();
        assert_eq!(decode(&responder.sink.body()), body);
    }

    #[tokio::test]
    async fn worker_threads_produce_valid_frames() {
        let body = vec![b'x'; 8000];
        let config = CompressionConfig::new().workers(2);
        let mut responder = ZstdResponder::new(RecordingSink::new(), &config).unwrap();
        responder.send(start_with(&[])).await.unwrap();
        responder.send(chunk(&body, false)).await.unwrap();
        assert_eq!(decode(&responder.sink.body()), body);
    }
}

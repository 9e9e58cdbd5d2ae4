use crate::channel::{EventSink, Handler, Protocol, Request};
use crate::config::CompressionConfig;
use crate::error::Error;
use crate::responder::ZstdResponder;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Middleware that wraps a handler and compresses its responses when the
/// client accepts it.
///
/// Exactly one path is chosen per request, before any response event exists:
/// excluded or non-HTTP requests are forwarded untouched, clients advertising
/// `zstd` get a [`ZstdResponder`], clients advertising only `gzip` get the
/// fallback responder when enabled, and everyone else gets the raw sink.
///
/// The `Accept-Encoding` value is matched by raw substring, deliberately
/// ignoring quality values.
pub struct CompressionMiddleware<H> {
    app: H,
    config: CompressionConfig,
    exclude: Vec<Regex>,
}

impl<H: Handler> CompressionMiddleware<H> {
    /// Wraps `app` with the given configuration.
    ///
    /// Exclusion patterns are compiled here; a malformed pattern is a
    /// configuration fault and fails construction rather than a request.
    pub fn new(app: H, config: CompressionConfig) -> Result<Self, Error> {
        let exclude = config
            .exclude_paths
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| Error::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self {
            app,
            config,
            exclude,
        })
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.is_match(path))
    }

    /// Serves one request, routing its response through at most one
    /// compressing responder.
    pub async fn handle(
        &self,
        request: &Request,
        transport: &mut dyn EventSink,
    ) -> Result<(), Error> {
        if request.protocol != Protocol::Http || self.is_excluded(request.uri.path()) {
            return self.app.call(request, transport).await;
        }

        let accept_encoding = request.accept_encoding();
        if accept_encoding.contains("zstd") {
            debug!(path = %request.uri.path(), "compressing response with zstd");
            let mut responder = ZstdResponder::new(transport, &self.config)?;
            return self.app.call(request, &mut responder).await;
        }

        #[cfg(feature = "gzip")]
        {
            if self.config.gzip_fallback && accept_encoding.contains("gzip") {
                debug!(path = %request.uri.path(), "falling back to gzip");
                let mut responder =
                    crate::gzip::GzipResponder::new(transport, self.config.min_size);
                return self.app.call(request, &mut responder).await;
            }
        }

        self.app.call(request, transport).await
    }
}

#[async_trait]
impl<H: Handler> Handler for CompressionMiddleware<H> {
    async fn call(&self, request: &Request, send: &mut dyn EventSink) -> Result<(), Error> {
        self.handle(request, send).await
    }
}

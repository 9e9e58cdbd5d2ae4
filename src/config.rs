/// Default minimum body size for compression, in bytes.
pub const DEFAULT_MIN_SIZE: usize = 500;

/// Settings for the compression middleware.
///
/// Built once per middleware instance and shared by every request it serves.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Zstd compression level. Negative levels select the fast modes.
    pub level: i32,
    /// Bodies delivered as a single complete chunk below this size are
    /// forwarded uncompressed.
    pub min_size: usize,
    /// Number of zstd worker threads; 0 compresses on the calling thread.
    pub workers: u32,
    /// Append a content checksum to each finished frame.
    pub checksum: bool,
    /// Record the uncompressed size in the frame header when known.
    pub content_size: bool,
    /// Fall back to gzip when the client accepts gzip but not zstd.
    pub gzip_fallback: bool,
    /// Regex patterns matched against the request path; any match bypasses
    /// compression entirely.
    pub exclude_paths: Vec<String>,
}

impl CompressionConfig {
    /// Creates a configuration with the default settings.
    pub fn new() -> Self {
        Self {
            level: 3,
            min_size: DEFAULT_MIN_SIZE,
            workers: 0,
            checksum: false,
            content_size: true,
            gzip_fallback: true,
            exclude_paths: Vec::new(),
        }
    }

    /// Sets the zstd compression level.
    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Sets the minimum body size required for compression.
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Sets the number of zstd worker threads.
    pub fn workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    /// Enables or disables the frame content checksum.
    pub fn checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Enables or disables recording the content size in the frame header.
    pub fn content_size(mut self, content_size: bool) -> Self {
        self.content_size = content_size;
        self
    }

    /// Enables or disables the gzip fallback path.
    pub fn gzip_fallback(mut self, enabled: bool) -> Self {
        self.gzip_fallback = enabled;
        self
    }

    /// Adds a path exclusion pattern.
    pub fn exclude_path(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_paths.push(pattern.into());
        self
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration options for BlockTable.

/// Configuration options for writing and opening tables.
#[derive(Debug, Clone)]
pub struct Options {
    /// Records per compressed block, and children per parent index entry.
    /// Fixed for the life of a table; readers take it from the metadata.
    /// Default: 64
    pub fanout: usize,

    /// DEFLATE compression level, 0 (store) through 9 (best).
    /// Default: 6
    pub compression_level: u32,

    /// Number of decompressed blocks a seeker keeps in its LRU cache.
    /// Default: 16
    pub block_cache_blocks: usize,

    /// Size of the reader's compressed input and decompressed output buffers.
    /// Default: 64KB
    pub read_buffer_size: usize,

    /// Reject keys that sort before the previous key (bytewise).
    /// Default: false
    pub verify_key_order: bool,

    /// Create the table directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// fsync every table file when a writer closes.
    /// Default: true
    pub sync_on_close: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            fanout: 64,
            compression_level: 6,
            block_cache_blocks: 16,
            read_buffer_size: 64 * 1024, // 64KB
            verify_key_order: false,
            create_if_missing: true,
            sync_on_close: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fanout.
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the DEFLATE compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the seeker block cache capacity, in blocks.
    pub fn block_cache_blocks(mut self, blocks: usize) -> Self {
        self.block_cache_blocks = blocks;
        self
    }

    /// Sets the reader buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Enables or disables key order verification in writers.
    pub fn verify_key_order(mut self, value: bool) -> Self {
        self.verify_key_order = value;
        self
    }

    /// Sets whether to create the table directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether closing a writer syncs its files to disk.
    pub fn sync_on_close(mut self, value: bool) -> Self {
        self.sync_on_close = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.fanout < 2 {
            return Err(crate::Error::invalid_argument("fanout must be >= 2"));
        }
        if self.fanout > u32::MAX as usize {
            return Err(crate::Error::invalid_argument("fanout must fit in 32 bits"));
        }
        if self.compression_level > 9 {
            return Err(crate::Error::invalid_argument("compression_level must be between 0 and 9"));
        }
        if self.block_cache_blocks == 0 {
            return Err(crate::Error::invalid_argument("block_cache_blocks must be > 0"));
        }
        if self.read_buffer_size == 0 {
            return Err(crate::Error::invalid_argument("read_buffer_size must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.fanout, 64);
        assert_eq!(opts.compression_level, 6);
        assert!(opts.create_if_missing);
        assert!(!opts.verify_key_order);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .fanout(4)
            .block_cache_blocks(2)
            .read_buffer_size(128)
            .verify_key_order(true);

        assert_eq!(opts.fanout, 4);
        assert_eq!(opts.block_cache_blocks, 2);
        assert_eq!(opts.read_buffer_size, 128);
        assert!(opts.verify_key_order);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.fanout = 1;
        assert!(opts.validate().is_err());

        opts.fanout = 2;
        opts.compression_level = 10;
        assert!(opts.validate().is_err());

        opts.compression_level = 0;
        opts.block_cache_blocks = 0;
        assert!(opts.validate().is_err());

        opts.block_cache_blocks = 1;
        assert!(opts.validate().is_ok());
    }
}

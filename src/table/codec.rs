//! Block codec over raw DEFLATE.
//!
//! The data file is one raw DEFLATE stream (no zlib header). Every block
//! boundary is a full flush: the compressor drains its output to a byte
//! boundary and forgets its dictionary, so inflating can start at any block's
//! `compressed_offset` with a fresh decompressor. The final block ends with
//! the stream's end-of-stream marker.

use crate::error::{Error, Result};
use crate::table::file::AppendFile;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Size of the compressor's output scratch buffer
const SCRATCH_SIZE: usize = 32 * 1024;

/// Streaming compressor that writes its output to an [`AppendFile`].
pub struct BlockCompressor {
    deflate: Compress,
    scratch: Vec<u8>,
}

impl BlockCompressor {
    /// Create a compressor at the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self { deflate: Compress::new(Compression::new(level), false), scratch: vec![0u8; SCRATCH_SIZE] }
    }

    /// Feed bytes without forcing output.
    pub fn write(&mut self, data: &[u8], sink: &mut AppendFile) -> Result<()> {
        self.run(data, FlushCompress::None, sink)
    }

    /// Emit a restart point: everything written so far becomes decodable
    /// and the next byte starts an independently inflatable block.
    pub fn flush_restart_point(&mut self, sink: &mut AppendFile) -> Result<()> {
        self.run(&[], FlushCompress::Full, sink)
    }

    /// Terminate the stream.
    pub fn finish(&mut self, sink: &mut AppendFile) -> Result<()> {
        self.run(&[], FlushCompress::Finish, sink)
    }

    fn run(&mut self, mut input: &[u8], flush: FlushCompress, sink: &mut AppendFile) -> Result<()> {
        let finishing = matches!(flush, FlushCompress::Finish);

        loop {
            let in_before = self.deflate.total_in();
            let out_before = self.deflate.total_out();
            let status = self.deflate.compress(input, &mut self.scratch, flush)?;
            let consumed = (self.deflate.total_in() - in_before) as usize;
            let produced = (self.deflate.total_out() - out_before) as usize;

            input = &input[consumed..];
            if produced > 0 {
                sink.append(&self.scratch[..produced])?;
            }

            if status == Status::StreamEnd {
                return Ok(());
            }
            if consumed == 0 && produced == 0 {
                if finishing || !input.is_empty() {
                    return Err(Error::compression("deflate made no progress"));
                }
                return Ok(());
            }
            if !finishing && input.is_empty() && produced < self.scratch.len() {
                return Ok(());
            }
        }
    }
}

/// Streaming decompressor, resumable at any restart point.
pub struct BlockDecompressor {
    inflate: Decompress,
    finished: bool,
}

impl BlockDecompressor {
    /// Create a decompressor positioned at a restart point.
    pub fn new() -> Self {
        Self { inflate: Decompress::new(false), finished: false }
    }

    /// Inflate from `input` into the spare capacity of `output`.
    ///
    /// Returns `(consumed, produced)`. Never grows `output`; callers reserve
    /// capacity first.
    pub fn inflate(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, usize)> {
        if self.finished {
            return Ok((0, 0));
        }

        let in_before = self.inflate.total_in();
        let out_before = output.len();
        let status = self.inflate.decompress_vec(input, output, FlushDecompress::None)?;
        if status == Status::StreamEnd {
            self.finished = true;
        }

        Ok(((self.inflate.total_in() - in_before) as usize, output.len() - out_before))
    }

    /// Whether the end-of-stream marker has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Compressed bytes consumed so far.
    pub fn total_in(&self) -> u64 {
        self.inflate.total_in()
    }
}

impl Default for BlockDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Inflate one whole block.
///
/// `last` marks the table's final block, which must contain the
/// end-of-stream marker; any other block must not.
pub fn inflate_block(compressed: &[u8], last: bool) -> Result<Vec<u8>> {
    let mut decompressor = BlockDecompressor::new();
    let mut out = Vec::with_capacity((compressed.len() * 4).max(256));
    let mut pos = 0;

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }

        let (consumed, produced) = decompressor.inflate(&compressed[pos..], &mut out)?;
        pos += consumed;

        if decompressor.is_finished() {
            break;
        }
        if pos == compressed.len() && out.len() < out.capacity() {
            break;
        }
        if consumed == 0 && produced == 0 && out.len() < out.capacity() {
            return Err(Error::compression("inflate made no progress"));
        }
    }

    if pos != compressed.len() {
        return Err(Error::corruption(format!(
            "{} bytes follow the end-of-stream marker inside a block",
            compressed.len() - pos
        )));
    }
    if last && !decompressor.is_finished() {
        return Err(Error::truncated("final block lacks the end-of-stream marker"));
    }
    if !last && decompressor.is_finished() {
        return Err(Error::corruption("end-of-stream marker before the final block"));
    }

    Ok(out)
}

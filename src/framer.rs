//! Zero-copy datagram framing
//!
//! StatsD allows multiple samples to be joined by newlines and sent as one
//! datagram. `SplitBytes` walks such a buffer chunk by chunk without
//! allocating or copying: every chunk is a sub-slice of the original buffer.
//!
//! The protocol is advance-and-fetch:
//!
//! ```
//! use metricd::framer::SplitBytes;
//!
//! let mut sb = SplitBytes::new(b"a.b:1|c\nx.y:2|g", b'\n');
//! let mut chunks = Vec::new();
//! while sb.next() {
//!     chunks.push(sb.chunk());
//! }
//! assert_eq!(chunks, [&b"a.b:1|c"[..], b"x.y:2|g"]);
//! ```
//!
//! A buffer that ends on the delimiter yields one final empty chunk. That is
//! deliberate: spurious trailing newlines are a wire-format violation, and
//! surfacing the empty chunk lets the decoder reject and count them instead
//! of this layer guessing at intent.

/// Iterates over a byte buffer, yielding chunks split by a delimiter byte.
///
/// Performs no allocation and never modifies the buffer. Not for concurrent
/// use; each datagram gets its own instance.
pub struct SplitBytes<'a> {
    buf: &'a [u8],
    delim: u8,
    current_chunk: &'a [u8],
    last_chunk: bool,
}

impl<'a> SplitBytes<'a> {
    #[inline]
    pub fn new(buf: &'a [u8], delim: u8) -> Self {
        SplitBytes {
            buf,
            delim,
            current_chunk: &[],
            last_chunk: false,
        }
    }

    /// Advance to the next chunk, returning true if one exists.
    ///
    /// The final chunk is returned even when it is empty, so the caller can
    /// tell "buffer ended on the delimiter" apart from "buffer ended".
    #[inline]
    pub fn next(&mut self) -> bool {
        if self.last_chunk {
            return false;
        }

        match memchr::memchr(self.delim, self.buf) {
            None => {
                // no delimiter left, consume the rest of the buffer
                self.current_chunk = self.buf;
                self.buf = &[];
                self.last_chunk = true;
            }
            Some(pos) => {
                self.current_chunk = &self.buf[..pos];
                self.buf = &self.buf[pos + 1..];
            }
        }
        true
    }

    /// The chunk most recently produced by [`next`](Self::next).
    #[inline]
    pub fn chunk(&self) -> &'a [u8] {
        self.current_chunk
    }
}

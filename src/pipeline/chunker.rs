//! Size-bounded text chunking
//!
//! Splits text into chunks of at most `size` characters. Each chunk ends at
//! the last paragraph break inside the size window, else the last line
//! break, else the last space, else exactly at the size bound. Consecutive
//! chunks share up to `overlap` characters, starting on a word boundary.
//!
//! Chunks are slices of the source: dropping each chunk's shared prefix and
//! concatenating reproduces the input exactly (see [`reassemble`]).

/// Break preference, largest unit first
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// A bounded slice of extracted text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Ordinal position
    pub index: usize,
    /// Chunk text
    pub text: String,
    /// Byte offset of the chunk in the source
    pub start: usize,
    /// Leading bytes shared with the previous chunk
    pub overlap: usize,
}

impl Chunk {
    /// Text not already covered by the previous chunk
    #[must_use]
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Splits text into overlapping, size-bounded chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `size` is clamped to at least 1 and `overlap` to
    /// below `size`.
    #[must_use]
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    /// Split `text` into chunks. Empty input yields no chunks.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut shared = 0;

        while start < text.len() {
            let rest = &text[start..];
            let limit = byte_offset_of_char(rest, self.size);
            let len = if limit == rest.len() {
                limit
            } else {
                break_point(&rest[..limit], shared)
            };

            chunks.push(Chunk {
                index: chunks.len(),
                text: rest[..len].to_string(),
                start,
                overlap: shared,
            });

            let end = start + len;
            if end >= text.len() {
                break;
            }

            let next = self.overlap_start(text, start, end);
            shared = end - next;
            start = next;
        }

        chunks
    }

    /// Where the chunk following `[start, end)` begins
    fn overlap_start(&self, text: &str, start: usize, end: usize) -> usize {
        if self.overlap == 0 {
            return end;
        }

        let window_start = text[..end]
            .char_indices()
            .rev()
            .nth(self.overlap - 1)
            .map_or(0, |(i, _)| i);

        // Don't begin mid-word: skip to just past the first whitespace
        let window = &text[window_start..end];
        let next = match window.find(char::is_whitespace) {
            Some(ws) => {
                let after = &window[ws..];
                let skipped = after.len() - after.trim_start().len();
                window_start + ws + skipped
            }
            None => end,
        };

        // Always make progress
        if next <= start { end } else { next }
    }
}

/// Byte offset of the `n`th character, or the length if shorter
fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Chunk length within `window`, preferring the largest separator unit.
/// The break must fall after the `shared` prefix so each chunk adds text.
fn break_point(window: &str, shared: usize) -> usize {
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let end = pos + sep.len();
            if end > shared {
                return end;
            }
        }
    }
    window.len()
}

/// Rebuild the source text from its chunks
#[must_use]
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

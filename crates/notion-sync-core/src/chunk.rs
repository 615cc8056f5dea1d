//! Splitting note bodies into pieces small enough for a single page write.
//!
//! Splits prefer line boundaries: the newline that ends a chunk is consumed
//! as the delimiter and restored by [`rejoin`]. When a window holds no
//! newline at all the text is cut at the size limit instead, which can land
//! in the middle of a line (or a code block).

/// Largest chunk sent in one create/append request, in bytes.
pub const MAX_CHUNK_LEN: usize = 4000;

/// One piece of a split body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Chunk text, no longer than the splitter's limit unless a single
    /// character is wider than the limit
    pub text: &'a str,
    /// Whether a newline between this chunk and the next was consumed
    pub ends_at_newline: bool,
}

/// Lazy iterator over the chunks of a body.
///
/// Cloning restarts from the current position; [`split`] and
/// [`Chunks::new`] always start from the beginning.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    body: &'a str,
    start: usize,
    max_len: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// Split `body` into chunks of at most `max_len` bytes.
    ///
    /// A `max_len` of zero is treated as one.
    pub fn new(body: &'a str, max_len: usize) -> Self {
        Self {
            body,
            start: 0,
            max_len: max_len.max(1),
            done: false,
        }
    }

    /// Where to cut the window starting at `self.start`, and whether the cut
    /// consumes a newline.
    fn next_boundary(&self) -> (usize, bool) {
        let bytes = self.body.as_bytes();
        let limit = self.start + self.max_len;

        // The byte at `limit` is the first one that does not fit; a newline
        // there (or anywhere after `start` before it) is a clean break.
        if let Some(offset) = bytes[self.start + 1..=limit].iter().rposition(|&b| b == b'\n') {
            return (self.start + 1 + offset, true);
        }

        let mut cut = limit;
        while cut > self.start && !self.body.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == self.start {
            // A single character wider than the limit
            cut = limit;
            while !self.body.is_char_boundary(cut) {
                cut += 1;
            }
        }
        (cut, false)
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }

        let remaining = self.body.len() - self.start;
        if remaining <= self.max_len {
            self.done = true;
            if remaining == 0 && self.start > 0 {
                // The previous chunk consumed a trailing newline
                return None;
            }
            return Some(Chunk {
                text: &self.body[self.start..],
                ends_at_newline: false,
            });
        }

        let (cut, at_newline) = self.next_boundary();
        let chunk = Chunk {
            text: &self.body[self.start..cut],
            ends_at_newline: at_newline,
        };
        self.start = if at_newline { cut + 1 } else { cut };
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

/// Split `body` into owned chunks of at most `max_len` bytes.
///
/// An empty body yields a single empty chunk. Otherwise no chunk is empty:
/// a newline consumed by the last cut is dropped rather than followed by an
/// empty chunk, so `split(body).join("\n")` can lose one trailing newline.
/// Use [`Chunks`] and [`rejoin`] when the exact body matters.
pub fn split(body: &str, max_len: usize) -> Vec<String> {
    Chunks::new(body, max_len)
        .map(|chunk| chunk.text.to_string())
        .collect()
}

/// Reassemble a body from its chunks, restoring consumed newlines.
pub fn rejoin(chunks: &[Chunk<'_>]) -> String {
    let mut out = String::with_capacity(chunks.iter().map(|c| c.text.len() + 1).sum());
    for chunk in chunks {
        out.push_str(chunk.text);
        if chunk.ends_at_newline {
            out.push('\n');
        }
    }
    out
}

//! Newline framing for the reader byte stream
//!
//! Serial reads return whatever bytes happen to be available, so a single
//! protocol line can arrive split across several chunks, and one chunk can
//! carry several lines. [`LineCodec`] buffers the unterminated remainder
//! verbatim until its newline arrives.

use tracing::{trace, warn};

use crate::FrameCodec;

/// Longest unterminated line kept in the buffer
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Streaming line codec
///
/// Lines are split on `\n`. A trailing `\r` and surrounding whitespace are
/// removed, blank lines are skipped, and invalid UTF-8 is replaced lossily
/// once the whole line is available (so multi-byte characters split across
/// chunks decode correctly).
///
/// An unterminated line that grows past [`MAX_LINE_LEN`] is dropped, and so
/// is everything up to its newline.
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
    /// Skipping the rest of an overlong line
    discarding: bool,
}

impl LineCodec {
    /// Create a new line codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Drain every complete line currently buffered
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_frame() {
            lines.push(line);
        }
        lines
    }
}

impl FrameCodec for LineCodec {
    type Frame = String;

    fn push_bytes(&mut self, mut data: &[u8]) {
        if self.discarding {
            let Some(end) = data.iter().position(|&b| b == b'\n') else {
                return;
            };
            self.discarding = false;
            data = &data[end + 1..];
        }
        self.buffer.extend_from_slice(data);

        let tail = self
            .buffer
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |end| end + 1);
        if self.buffer.len() - tail > MAX_LINE_LEN {
            warn!("Dropping unterminated line over {} bytes", MAX_LINE_LEN);
            self.buffer.truncate(tail);
            self.discarding = true;
        }
    }

    fn next_frame(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            trace!("Framed line ({} bytes pending): {}", self.buffer.len(), line);
            return Some(line.to_string());
        }
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut codec = LineCodec::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            codec.push_bytes(chunk);
            lines.extend(codec.drain_lines());
        }
        lines
    }

    #[test]
    fn test_single_line() {
        assert_eq!(frame_all(&[b"hello\n"]), vec!["hello"]);
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"{\"name\":\"Ze");
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.pending(), 11);

        codec.push_bytes(b"lda\"}\nnext");
        assert_eq!(codec.next_frame().as_deref(), Some("{\"name\":\"Zelda\"}"));
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.pending(), 4);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        assert_eq!(frame_all(&[b"one\ntwo\nthree\n"]), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        assert_eq!(frame_all(&[b"one\r\n\r\n   \ntwo\r\n"]), vec!["one", "two"]);
    }

    #[test]
    fn test_split_utf8_character() {
        let text = "Pokémon\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert_eq!(frame_all(&[&text[..split], &text[split..]]), vec!["Pokémon"]);
    }

    #[test]
    fn test_clear_discards_remainder() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"partial");
        codec.clear();
        codec.push_bytes(b"line\n");
        assert_eq!(codec.next_frame().as_deref(), Some("line"));
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"before\n");
        for _ in 0..16 {
            codec.push_bytes(&[b'x'; 64 * 1024]);
        }
        assert_eq!(codec.pending(), b"before\n".len());
        assert_eq!(codec.drain_lines(), vec!["before"]);
        assert_eq!(codec.pending(), 0);

        // The rest of the dropped line is skipped, the next one is kept
        codec.push_bytes(b"tail\nnext\n");
        assert_eq!(codec.drain_lines(), vec!["next"]);
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut codec = LineCodec::new();
        codec.push_bytes(&[b'a'; MAX_LINE_LEN]);
        assert_eq!(codec.pending(), MAX_LINE_LEN);

        codec.push_bytes(b"\n");
        assert_eq!(codec.drain_lines(), vec!["a".repeat(MAX_LINE_LEN)]);
    }

    #[test]
    fn test_clear_stops_discarding() {
        let mut codec = LineCodec::new();
        codec.push_bytes(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(codec.pending(), 0);
        codec.clear();
        codec.push_bytes(b"fresh\n");
        assert_eq!(codec.drain_lines(), vec!["fresh"]);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_lines(
            data in proptest::collection::vec(
                prop_oneof![Just(b'\n'), Just(b'\r'), Just(b' '), any::<u8>()],
                0..512,
            ),
            cuts in proptest::collection::vec(0usize..512, 0..16),
        ) {
            let whole = frame_all(&[&data]);

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            cuts.sort_unstable();
            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut start = 0;
            for cut in cuts {
                chunks.push(&data[start..cut]);
                start = cut;
            }
            chunks.push(&data[start..]);

            prop_assert_eq!(frame_all(&chunks), whole);
        }
    }
}

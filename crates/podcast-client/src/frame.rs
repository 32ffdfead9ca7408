//! Line framing for the generation event stream.
//!
//! The transport hands out arbitrary byte chunks. `Utf8Decoder` turns them into
//! text without splitting multi-byte characters, and `FrameDecoder` cuts that
//! text into complete newline-terminated lines. `StreamDecoder` chains both.

/// One complete logical line of the stream, without its terminating `\n`.
pub type Frame = String;

/// Incremental UTF-8 decoder.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk arrives. Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes as much of `chunk` (prefixed by any held-back bytes) as forms
    /// complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if chunk.is_empty() {
            return String::new();
        }
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to always lands on a char boundary
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Returns any held-back bytes as text (lossy) and clears the state.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Splits text into newline-terminated frames, carrying partial lines across
/// calls.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
}

impl FrameDecoder {
    /// Appends `text` and returns every line it completes.
    ///
    /// A chunk ending exactly on `\n` leaves the buffer empty; it never yields
    /// an extra empty frame.
    pub fn feed(&mut self, text: &str) -> Vec<Frame> {
        if text.is_empty() {
            return Vec::new();
        }
        self.buf.push_str(text);
        let Some(last_newline) = self.buf.rfind('\n') else {
            return Vec::new();
        };
        let remainder = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, remainder);
        complete[..complete.len() - 1]
            .split('\n')
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Emits the residual partial line, if any, and clears the buffer.
    pub fn flush(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }

    /// Whether a partial line is currently buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Byte-level decoder: UTF-8 first, then line framing.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    utf8: Utf8Decoder,
    frames: FrameDecoder,
}

impl StreamDecoder {
    /// Feeds one raw transport chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let text = self.utf8.decode(chunk);
        self.frames.feed(&text)
    }

    /// Drains both stages at end-of-stream. Returns the final frames in order.
    pub fn finish(&mut self) -> Vec<Frame> {
        let tail = self.utf8.finish();
        let mut frames = self.frames.feed(&tail);
        frames.extend(self.frames.flush());
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "data: {\"type\":\"progress\",\"message\":\"start\"}\n\n\
data: {\"type\":\"log\",\"message\":\"音频 ready\"}\n\n\
data: {\"type\":\"complete\",\"audio_url\":\"/a.mp3\"}\n";

    fn decode_in_pieces(bytes: &[u8], sizes: &[usize]) -> Vec<Frame> {
        let mut decoder = StreamDecoder::default();
        let mut frames = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < bytes.len() {
            let size = sizes[i % sizes.len()].max(1);
            let end = (offset + size).min(bytes.len());
            frames.extend(decoder.push_chunk(&bytes[offset..end]));
            offset = end;
            i += 1;
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn frames_are_identical_for_every_split_pattern() {
        let bytes = STREAM.as_bytes();
        let expected = decode_in_pieces(bytes, &[bytes.len()]);
        assert_eq!(expected.len(), 5);
        for size in 1..=bytes.len() {
            assert_eq!(
                decode_in_pieces(bytes, &[size]),
                expected,
                "split size {size}"
            );
        }
        assert_eq!(decode_in_pieces(bytes, &[1, 7, 3, 13]), expected);
    }

    #[test]
    fn newline_on_chunk_boundary_yields_no_empty_frame() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.feed("data: a\n"), vec!["data: a".to_string()]);
        assert!(!decoder.has_partial());
        assert_eq!(decoder.feed("data: b\n"), vec!["data: b".to_string()]);
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn partial_line_is_prefixed_onto_next_chunk() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed("data: {\"type\":").is_empty());
        assert!(decoder.has_partial());
        let frames = decoder.feed("\"log\"}\ndata: x");
        assert_eq!(frames, vec!["data: {\"type\":\"log\"}".to_string()]);
        assert_eq!(decoder.flush(), Some("data: x".to_string()));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut decoder = StreamDecoder::default();
        assert!(decoder.push_chunk(b"").is_empty());
        assert!(decoder.push_chunk(b"abc").is_empty());
        assert!(decoder.push_chunk(b"").is_empty());
        assert_eq!(decoder.finish(), vec!["abc".to_string()]);
    }

    #[test]
    fn multibyte_character_split_across_chunks_is_preserved() {
        let text = "data: 播客\n";
        let bytes = text.as_bytes();
        // split inside the first CJK character
        let mut decoder = StreamDecoder::default();
        assert!(decoder.push_chunk(&bytes[..7]).is_empty());
        let frames = decoder.push_chunk(&bytes[7..]);
        assert_eq!(frames, vec!["data: 播客".to_string()]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut utf8 = Utf8Decoder::default();
        assert_eq!(utf8.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn dangling_sequence_is_flushed_lossily() {
        let mut utf8 = Utf8Decoder::default();
        assert_eq!(utf8.decode(&[b'x', 0xe6, 0x92]), "x");
        assert_eq!(utf8.finish(), "\u{FFFD}");
        assert_eq!(utf8.finish(), "");
    }
}

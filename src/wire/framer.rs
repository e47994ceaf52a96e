//! Newline framing.
//!
//! Messages are complete UTF-8 JSON objects delimited by `0x0A`. The
//! framer is total over arbitrary chunkings: feed it bytes however they
//! arrive and it yields the same sequence of complete frames, retaining
//! any incomplete tail for the next push.

/// Incremental newline splitter.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame completed by this chunk.
    /// Empty frames (bare newlines) are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes buffered awaiting a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

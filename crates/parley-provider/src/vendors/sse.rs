//! Cross-chunk SSE frame reassembly.
//!
//! Network chunk boundaries are arbitrary: a `data:` line, or even a single
//! multibyte UTF-8 character, can be split across two reads. Bytes accumulate
//! here and are decoded only once a frame's `"\n\n"` terminator has arrived.

/// Accumulates raw bytes and yields complete SSE frames.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one network chunk; returns every frame it completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = find_frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..pos + 2).collect();
            frames.push(String::from_utf8_lossy(&frame[..pos]).into_owned());
        }
        frames
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

//! Rolling 64 KiB buffer for post-stream usage extraction (§4.9).
//!
//! Older bytes are discarded as new bytes arrive — only the tail of the
//! response is ever needed to find the terminal `usage` object.

const CAPACITY: usize = 64 * 1024;

pub struct RingBuffer {
    buf: Vec<u8>,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(CAPACITY) }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= CAPACITY {
            self.buf.clear();
            self.buf.extend_from_slice(&chunk[chunk.len() - CAPACITY..]);
            return;
        }

        let overflow = (self.buf.len() + chunk.len()).saturating_sub(CAPACITY);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(chunk);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_only_the_tail_once_over_capacity() {
        let mut ring = RingBuffer::new();
        ring.push(&vec![b'a'; CAPACITY]);
        ring.push(b"tail-marker");
        let bytes = ring.as_bytes();
        assert!(bytes.ends_with(b"tail-marker"));
        assert!(bytes.len() <= CAPACITY);
    }

    #[test]
    fn small_pushes_accumulate_without_loss() {
        let mut ring = RingBuffer::new();
        ring.push(b"hello ");
        ring.push(b"world");
        assert_eq!(ring.as_bytes(), b"hello world");
    }

    #[test]
    fn a_single_chunk_larger_than_capacity_keeps_only_its_tail() {
        let mut ring = RingBuffer::new();
        let mut huge = vec![b'x'; CAPACITY * 2];
        huge.extend_from_slice(b"END");
        ring.push(&huge);
        assert!(ring.as_bytes().ends_with(b"END"));
        assert_eq!(ring.as_bytes().len(), CAPACITY);
    }
}

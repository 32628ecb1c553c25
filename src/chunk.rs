//! Ref-counted byte slice (`ByteChunk`) and the FIFO chunk buffer built on
//! top of it (`ChunkBuffer`). Grounded in `original_source/src/lib/buffer.cc`
//! (`Buffer::merge_prefix`/`double_prefix`/`remove_prefix`) — this is the
//! Rust-native version of ctornado's manual refcounted `Str`: sub-slices
//! share one `Rc<Vec<u8>>` allocation instead of bumping a C refcount by hand.

use std::collections::VecDeque;
use std::rc::Rc;

/// An immutable view into a ref-counted byte buffer. Null (no buffer, zero
/// length) and empty-but-non-null (a real zero-length slice of a buffer)
/// are distinct states; parsers rely on being able to tell them apart.
#[derive(Clone)]
pub struct ByteChunk {
    buf: Option<Rc<Vec<u8>>>,
    start: usize,
    len: usize,
}

impl ByteChunk {
    pub fn null() -> Self {
        ByteChunk { buf: None, start: 0, len: 0 }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        ByteChunk { buf: Some(Rc::new(data)), start: 0, len }
    }

    pub fn is_null(&self) -> bool {
        self.buf.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.buf {
            Some(rc) => &rc[self.start..self.start + self.len],
            None => &[],
        }
    }

    /// A sub-range of this chunk aliasing the same underlying allocation.
    pub fn sub(&self, offset: usize, len: usize) -> ByteChunk {
        assert!(offset + len <= self.len, "ByteChunk::sub out of range");
        match &self.buf {
            Some(rc) => ByteChunk { buf: Some(Rc::clone(rc)), start: self.start + offset, len },
            None => ByteChunk::null(),
        }
    }
}

impl Default for ByteChunk {
    fn default() -> Self {
        ByteChunk::null()
    }
}

/// An ordered sequence of `ByteChunk`s with a cached total size.
pub struct ChunkBuffer {
    chunks: VecDeque<ByteChunk>,
    size: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        ChunkBuffer { chunks: VecDeque::new(), size: 0 }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn push_back(&mut self, chunk: ByteChunk) {
        self.size += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn pop_front(&mut self) -> Option<ByteChunk> {
        let chunk = self.chunks.pop_front()?;
        self.size -= chunk.len();
        Some(chunk)
    }

    pub fn peek_front(&self) -> Option<&ByteChunk> {
        self.chunks.front()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }

    /// Coalesce the front chunks so the first chunk is exactly
    /// `min(n, size)` bytes.
    pub fn merge_prefix(&mut self, n: usize) {
        if self.chunks.len() == 1 && self.chunks[0].len() <= n {
            return;
        }
        if !self.chunks.is_empty() && n > 0 {
            let front_len = self.chunks[0].len();
            if front_len == n {
                return;
            }
            if front_len > n {
                let front = self.chunks.pop_front().unwrap();
                let tail = front.sub(n, front_len - n);
                let head = front.sub(0, n);
                self.chunks.push_front(tail);
                self.chunks.push_front(head);
                return;
            }

            let target = n.min(self.size);
            let mut merged = Vec::with_capacity(target);
            let mut remaining = target;
            while remaining > 0 {
                let chunk = self.chunks.pop_front().unwrap();
                if chunk.len() > remaining {
                    merged.extend_from_slice(&chunk.as_slice()[..remaining]);
                    self.chunks.push_front(chunk.sub(remaining, chunk.len() - remaining));
                    remaining = 0;
                } else {
                    merged.extend_from_slice(chunk.as_slice());
                    remaining -= chunk.len();
                }
            }
            self.chunks.push_front(ByteChunk::from_vec(merged));
        }
        if self.chunks.is_empty() {
            self.chunks.push_front(ByteChunk::from_vec(Vec::new()));
        }
    }

    /// Grow the first chunk to at least `max(2*front, front+second)`.
    pub fn double_prefix(&mut self) {
        if self.chunks.len() < 2 {
            return;
        }
        let n = (self.chunks[0].len() * 2).max(self.chunks[0].len() + self.chunks[1].len());
        self.merge_prefix(n);
    }

    /// Drop `n` bytes from the front.
    pub fn remove_prefix(&mut self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            let Some(chunk) = self.chunks.pop_front() else { break };
            if chunk.len() > remaining {
                self.chunks.push_front(chunk.sub(remaining, chunk.len() - remaining));
                self.size -= remaining;
                remaining = 0;
            } else {
                self.size -= chunk.len();
                remaining -= chunk.len();
            }
        }
    }

    /// Merge the first `loc` bytes into one chunk and pop it off. Used by
    /// `Stream` to hand a terminal read result to a callback.
    pub fn consume(&mut self, loc: usize) -> ByteChunk {
        if loc == 0 {
            return ByteChunk::null();
        }
        self.merge_prefix(loc);
        self.pop_front().unwrap_or_else(ByteChunk::null)
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        ChunkBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_tracks_pushes_and_pops() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"abc".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"de".to_vec()));
        assert_eq!(buf.size(), 5);
        let popped = buf.pop_front().unwrap();
        assert_eq!(popped.as_slice(), b"abc");
        assert_eq!(buf.size(), 2);
    }

    #[test]
    fn merge_prefix_coalesces_across_chunks() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"ab".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"cd".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"ef".to_vec()));
        buf.merge_prefix(5);
        assert_eq!(buf.peek_front().unwrap().as_slice(), b"abcde");
        assert_eq!(buf.size(), 6);
    }

    #[test]
    fn merge_prefix_splits_an_oversized_front_chunk() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"abcdef".to_vec()));
        buf.merge_prefix(2);
        assert_eq!(buf.peek_front().unwrap().as_slice(), b"ab");
        assert_eq!(buf.size(), 6);
    }

    #[test]
    fn double_prefix_grows_geometrically() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"a".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"bb".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"ccc".to_vec()));
        buf.double_prefix();
        // front(1) + second(2) = 3 > front*2(2), so merges to 3 bytes.
        assert_eq!(buf.peek_front().unwrap().len(), 3);
    }

    #[test]
    fn remove_prefix_drops_bytes_across_chunks() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"abc".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"def".to_vec()));
        buf.remove_prefix(4);
        assert_eq!(buf.size(), 2);
        assert_eq!(buf.peek_front().unwrap().as_slice(), b"ef");
    }

    #[test]
    fn null_and_empty_are_distinct() {
        let null = ByteChunk::null();
        let empty = ByteChunk::from_vec(Vec::new());
        assert!(null.is_null());
        assert!(!empty.is_null());
        assert_eq!(null.len(), 0);
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn consume_merges_and_pops() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"abc".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"def".to_vec()));
        let chunk = buf.consume(4);
        assert_eq!(chunk.as_slice(), b"abcd");
        assert_eq!(buf.size(), 2);
    }

    #[test]
    fn consume_zero_returns_null() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"abc".to_vec()));
        let chunk = buf.consume(0);
        assert!(chunk.is_null());
        assert_eq!(buf.size(), 3);
    }
}

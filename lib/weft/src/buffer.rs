pub(crate) const CHUNK_SIZE: usize = 4096;

/// One fixed-size slab of the buffer. Data is only ever appended; the
/// `reserved` count shaves capacity off the end so a trailing terminator can
/// be written without growing the chunk.
struct Chunk {
    data: Box<[u8; CHUNK_SIZE]>,
    end: usize,
    reserved: usize,
}

impl Chunk {
    #[inline]
    fn new(reserved: usize) -> Chunk {
        Chunk {
            data: Box::new([0; CHUNK_SIZE]),
            end: 0,
            reserved,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        CHUNK_SIZE - self.reserved - self.end
    }

    #[inline]
    fn write(&mut self, slice: &[u8]) {
        if slice.len() > self.capacity() {
            panic!("Attempted to write beyond chunk capacity");
        }
        self.data[self.end..(self.end + slice.len())].copy_from_slice(slice);
        self.end += slice.len();
    }

    #[inline]
    fn filled(&self) -> &[u8] {
        &self.data[..self.end]
    }
}

/// A byte container that grows by fixed-size chunks. Backing store for both
/// the binary message format and the textual buffer; appends never move
/// previously written bytes.
///
/// With `pad_with_null` set, every chunk reserves one trailing byte so that
/// `to_contiguous` can terminate the data in place and the content is always
/// consumable as a C string.
pub struct ChunkBuffer {
    chunks: Vec<Chunk>,
    pad_with_null: bool,
    cached: Option<Vec<u8>>,
}

impl ChunkBuffer {
    #[inline]
    pub fn new(pad_with_null: bool) -> ChunkBuffer {
        let reserved = if pad_with_null { 1 } else { 0 };

        ChunkBuffer {
            chunks: vec![Chunk::new(reserved)],
            pad_with_null,
            cached: None,
        }
    }

    /// Total number of data bytes held.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.end).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.len() == 1 && self.chunks[0].end == 0
    }

    /// Append bytes, spilling into fresh chunks as needed.
    pub fn append(&mut self, mut data: &[u8]) {
        self.cached = None;

        while !data.is_empty() {
            let reserved = if self.pad_with_null { 1 } else { 0 };
            let last = self.chunks.last_mut().expect("Buffer must hold at least one chunk");
            let room = last.capacity();

            if room == 0 {
                self.chunks.push(Chunk::new(reserved));
                continue;
            }

            let take = room.min(data.len());
            last.write(&data[..take]);
            data = &data[take..];
        }
    }

    #[inline]
    pub fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    /// Random access without materializing a contiguous copy. Returns the
    /// byte and an at-end flag; past the end the byte is 0 and the flag set.
    pub fn byte_at(&self, index: usize) -> (u8, bool) {
        let mut remaining = index;

        for chunk in &self.chunks {
            if remaining < chunk.end {
                return (chunk.data[remaining], false);
            }
            remaining -= chunk.end;
        }

        (0, true)
    }

    /// Drop all content, retaining a single empty chunk.
    pub fn reset(&mut self) {
        let reserved = if self.pad_with_null { 1 } else { 0 };

        self.chunks.clear();
        self.chunks.push(Chunk::new(reserved));
        self.cached = None;
    }

    /// A contiguous view of the content. Single-chunk buffers are returned
    /// in place; multi-chunk buffers are flattened into a cache that is
    /// invalidated by the next mutation.
    pub fn to_contiguous(&mut self) -> &[u8] {
        if self.chunks.len() == 1 {
            if self.pad_with_null {
                let end = self.chunks[0].end;
                self.chunks[0].data[end] = 0;
            }
            return self.chunks[0].filled();
        }

        if self.cached.is_none() {
            let mut flat = Vec::with_capacity(self.len() + 1);

            for chunk in &self.chunks {
                flat.extend_from_slice(chunk.filled());
            }
            if self.pad_with_null {
                flat.push(0);
            }
            self.cached = Some(flat);
        }

        let cached = self.cached.as_ref().expect("Cache was just populated");
        let data_len = if self.pad_with_null { cached.len() - 1 } else { cached.len() };

        &cached[..data_len]
    }

    /// Copy the content out as an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.len());

        for chunk in &self.chunks {
            flat.extend_from_slice(chunk.filled());
        }

        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = ChunkBuffer::new(false);

        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_at(0), (0, true));
    }

    #[test]
    fn test_append_and_read_back() {
        let mut buffer = ChunkBuffer::new(false);

        buffer.append(&[1, 2, 3, 4]);

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.byte_at(0), (1, false));
        assert_eq!(buffer.byte_at(3), (4, false));
        assert_eq!(buffer.byte_at(4), (0, true));
    }

    #[test]
    fn test_append_spills_across_chunks() {
        let mut buffer = ChunkBuffer::new(false);
        let data: Vec<u8> = (0..(CHUNK_SIZE + 100)).map(|ii| ii as u8).collect();

        buffer.append(&data);

        assert_eq!(buffer.len(), CHUNK_SIZE + 100);
        assert_eq!(buffer.byte_at(CHUNK_SIZE), (CHUNK_SIZE as u8, false));
        assert_eq!(buffer.to_contiguous(), data.as_slice());
    }

    #[test]
    fn test_single_chunk_contiguous_is_in_place() {
        let mut buffer = ChunkBuffer::new(false);

        buffer.append(&[9, 8, 7]);

        assert_eq!(buffer.to_contiguous(), &[9, 8, 7]);
        // Still a single chunk; no cache should have been built.
        assert!(buffer.cached.is_none());
    }

    #[test]
    fn test_reset_clears_content() {
        let mut buffer = ChunkBuffer::new(false);

        buffer.append(&[1, 2, 3]);
        buffer.reset();

        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.byte_at(0), (0, true));
    }

    #[test]
    fn test_null_padding_reserves_slot() {
        let mut buffer = ChunkBuffer::new(true);
        let data: Vec<u8> = vec![7; CHUNK_SIZE];

        buffer.append(&data);

        // The reserved terminator slot forces a spill into a second chunk.
        assert_eq!(buffer.chunks.len(), 2);
        assert_eq!(buffer.len(), CHUNK_SIZE);
        assert_eq!(buffer.to_contiguous(), data.as_slice());
    }

    #[test]
    fn test_null_padding_terminates_single_chunk() {
        let mut buffer = ChunkBuffer::new(true);

        buffer.append(b"abc");

        let view = buffer.to_contiguous();
        assert_eq!(view, b"abc");
        assert_eq!(buffer.chunks[0].data[3], 0);
    }

    #[test]
    fn test_cache_invalidated_on_mutation() {
        let mut buffer = ChunkBuffer::new(false);
        let data: Vec<u8> = vec![1; CHUNK_SIZE + 1];

        buffer.append(&data);
        assert_eq!(buffer.to_contiguous().len(), CHUNK_SIZE + 1);

        buffer.append(&[2]);
        let view = buffer.to_contiguous();

        assert_eq!(view.len(), CHUNK_SIZE + 2);
        assert_eq!(view[CHUNK_SIZE + 1], 2);
    }
}

use std::io;

pub(crate) const CHUNK_SIZE: usize = 8192;

/// A linear byte slab with independent read and write cursors. Consuming
/// data advances the start cursor, writing advances the end cursor; when
/// the cursors meet the chunk snaps back to empty.
struct Chunk {
    data: Box<[u8; CHUNK_SIZE]>,
    start: usize,
    end: usize,
}

impl Chunk {
    #[inline]
    fn new() -> Chunk {
        Chunk {
            data: Box::new([0; CHUNK_SIZE]),
            start: 0,
            end: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        CHUNK_SIZE - self.end
    }

    #[inline]
    fn remaining_data(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    fn write(&mut self, slice: &[u8]) {
        self.data[self.end..(self.end + slice.len())].copy_from_slice(slice);
        self.end += slice.len();
    }

    #[inline]
    fn advance(&mut self, count: usize) {
        if self.start + count > self.end {
            panic!("Attempted to advance past chunk edge");
        }
        self.start += count;
        self.check_clear();
    }

    #[inline]
    fn expand(&mut self, count: usize) {
        if self.end + count > CHUNK_SIZE {
            panic!("Attempted to expand beyond chunk size");
        }
        self.end += count;
    }

    #[inline]
    fn readable_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    #[inline]
    fn writeable_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.end..CHUNK_SIZE]
    }

    #[inline]
    fn check_clear(&mut self) {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }
}

/// A dynamically sized buffered FIFO byte queue over fixed-size chunks.
/// Data is appended at the tail and consumed from the head; `ingress` and
/// `egress` move bytes between the queue and a non-blocking socket,
/// treating `WouldBlock` as a clean stop.
pub struct IoBuffer {
    chunks: Vec<Chunk>,
}

impl IoBuffer {
    #[inline]
    pub fn new() -> IoBuffer {
        IoBuffer {
            chunks: vec![Chunk::new()],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::remaining_data).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|chunk| chunk.remaining_data() == 0)
    }

    /// Append bytes at the tail, growing by whole chunks.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let last = self.chunks.last_mut().expect("Buffer must hold at least one chunk");
            let room = last.capacity();

            if room == 0 {
                self.chunks.push(Chunk::new());
                continue;
            }

            let take = room.min(data.len());
            last.write(&data[..take]);
            data = &data[take..];
        }
    }

    /// The byte at `offset` from the head, spanning chunks.
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        let mut remaining = offset;

        for chunk in &self.chunks {
            let held = chunk.remaining_data();

            if remaining < held {
                return Some(chunk.data[chunk.start + remaining]);
            }
            remaining -= held;
        }

        None
    }

    /// Detach `count` bytes from the head.
    pub fn consume(&mut self, count: usize) -> Vec<u8> {
        if count > self.len() {
            panic!("Attempted to consume past buffer edge");
        }

        let mut taken = Vec::with_capacity(count);
        let mut remaining = count;

        while remaining > 0 {
            let first = &mut self.chunks[0];
            let held = first.remaining_data();

            if held == 0 {
                self.chunks.remove(0);
                continue;
            }

            let take = held.min(remaining);
            taken.extend_from_slice(&first.readable_slice()[..take]);
            first.advance(take);
            remaining -= take;
        }

        // Shed fully drained chunks, keeping one.
        while self.chunks.len() > 1 && self.chunks[0].remaining_data() == 0 {
            self.chunks.remove(0);
        }

        taken
    }

    /// Write buffered data out until the buffer drains or the writer would
    /// block. Returns the number of bytes written.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;

        loop {
            let first = match self.chunks.iter_mut().find(|chunk| chunk.remaining_data() > 0) {
                Some(chunk) => chunk,
                None => {
                    self.chunks.retain(|chunk| chunk.remaining_data() > 0);
                    if self.chunks.is_empty() {
                        self.chunks.push(Chunk::new());
                    }
                    return Ok(written);
                }
            };

            match writer.write(first.readable_slice()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => {
                    first.advance(count);
                    written += count;
                }
                Err(error) => {
                    if error.kind() == io::ErrorKind::WouldBlock {
                        return Ok(written);
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Read from the reader until it would block or closes. Returns the
    /// number of bytes read and whether the peer closed the stream.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<(usize, bool)> {
        let mut received = 0;

        loop {
            if self.chunks.last().expect("Buffer must hold at least one chunk").capacity() == 0 {
                self.chunks.push(Chunk::new());
            }

            let last = self.chunks.last_mut().expect("Buffer must hold at least one chunk");

            match reader.read(last.writeable_slice()) {
                Ok(0) => return Ok((received, true)),
                Ok(count) => {
                    last.expand(count);
                    received += count;
                }
                Err(error) => {
                    if error.kind() == io::ErrorKind::WouldBlock {
                        return Ok((received, false));
                    }
                    return Err(error);
                }
            }
        }
    }
}

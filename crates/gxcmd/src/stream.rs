use std::collections::VecDeque;

use crate::Primitive;

/// Trait for types which can be seen as a binary data source.
pub trait BinaryStream {
    /// Prepares the stream for reading.
    fn prepare(&mut self) {}

    /// The currently available data.
    fn data(&self) -> &[u8];

    /// Consumes `amount` bytes from the data.
    fn consume(&mut self, amount: usize);
}

impl BinaryStream for &[u8] {
    fn data(&self) -> &[u8] {
        self
    }

    fn consume(&mut self, amount: usize) {
        *self = &self[amount..];
    }
}

/// A cursor over binary data that only advances when there is enough data for a read.
///
/// Reads never consume partially: a read that does not fit returns `None` and leaves the cursor
/// where it was. This makes it possible to peek a whole command before committing to it.
#[derive(Debug, Clone)]
pub struct BinReader<'a> {
    data: &'a [u8],
    read: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, read: 0 }
    }

    /// Reads a primitive if there is enough data for it.
    #[inline(always)]
    pub fn read_be<P>(&mut self) -> Option<P>
    where
        P: Primitive,
    {
        let slice = &self.data[self.read..];
        (slice.len() >= size_of::<P>()).then(|| {
            self.read += size_of::<P>();
            P::read_be_bytes(slice)
        })
    }

    /// Reads a sequence of `length` bytes if there is enough data for it.
    #[inline(always)]
    pub fn read_bytes(&mut self, length: usize) -> Option<&'a [u8]> {
        let slice = &self.data[self.read..];
        (slice.len() >= length).then(|| {
            self.read += length;
            &slice[..length]
        })
    }

    /// Returns how many bytes of data are remaining.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read
    }

    /// Returns how many bytes have been read so far.
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.read
    }
}

/// A ring buffer of binary data.
#[derive(Debug, Clone, Default)]
pub struct BinRingBuffer {
    data: VecDeque<u8>,
}

impl BinRingBuffer {
    /// Pushes the given primitive onto the buffer encoded as big-endian.
    pub fn push_be<P>(&mut self, value: P)
    where
        P: Primitive,
    {
        let mut bytes = [0; 8];
        value.write_be_bytes(&mut bytes);
        self.data.extend(&bytes[0..size_of::<P>()]);
    }

    /// Pushes raw bytes onto the back of the buffer.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend(bytes);
    }

    /// Removes every byte from the buffer.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Copies the contents of the buffer into a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Current length of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty or not.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BinaryStream for BinRingBuffer {
    fn prepare(&mut self) {
        self.data.make_contiguous();
    }

    fn data(&self) -> &[u8] {
        self.data.as_slices().0
    }

    fn consume(&mut self, amount: usize) {
        self.data.drain(..amount);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_reads_do_not_advance() {
        let data = [0x12, 0x34, 0x56];
        let mut reader = BinReader::new(&data);

        assert_eq!(reader.read_be::<u16>(), Some(0x1234));
        assert_eq!(reader.read_be::<u16>(), None);
        assert_eq!(reader.consumed(), 2);
        assert_eq!(reader.read_bytes(2), None);
        assert_eq!(reader.read_bytes(1), Some(&[0x56][..]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn ring_buffer_consumes_from_front() {
        let mut ring = BinRingBuffer::default();
        ring.push_bytes(&[1, 2, 3]);
        ring.push_be(0x0405u16);
        ring.prepare();

        assert_eq!(ring.data(), &[1, 2, 3, 4, 5]);
        ring.consume(2);
        assert_eq!(ring.to_vec(), vec![3, 4, 5]);
        assert_eq!(ring.len(), 3);
    }
}

//! Memory module interface.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::Address;

/// Byte addressable emulated memory.
///
/// Both the producer and the consumer access memory concurrently. Implementations must not
/// block; ordering between the two roles is established by the FIFO pointers.
pub trait MemoryModule: Send + Sync {
    /// Reads `buf.len()` bytes starting at `addr`. Returns `false` if the range is not mapped, in
    /// which case the contents of `buf` are unspecified.
    fn read(&self, addr: Address, buf: &mut [u8]) -> bool;

    /// Writes `data` starting at `addr`. Returns `false` if the range is not mapped.
    fn write(&self, addr: Address, data: &[u8]) -> bool;
}

/// Flat physical memory starting at address zero.
pub struct Ram {
    data: Box<[AtomicU8]>,
}

impl Ram {
    /// Creates zeroed memory with `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Size of this memory in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    fn range(&self, addr: Address, len: usize) -> Option<&[AtomicU8]> {
        let start = addr.physical().value() as usize;
        self.data.get(start..start.checked_add(len)?)
    }
}

impl std::fmt::Debug for Ram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ram").field("len", &self.len()).finish()
    }
}

impl MemoryModule for Ram {
    fn read(&self, addr: Address, buf: &mut [u8]) -> bool {
        let Some(range) = self.range(addr, buf.len()) else {
            return false;
        };

        for (dst, src) in buf.iter_mut().zip(range) {
            *dst = src.load(Ordering::Relaxed);
        }

        true
    }

    fn write(&self, addr: Address, data: &[u8]) -> bool {
        let Some(range) = self.range(addr, data.len()) else {
            return false;
        };

        for (dst, src) in range.iter().zip(data) {
            dst.store(*src, Ordering::Relaxed);
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ram_bounds() {
        let ram = Ram::new(64);
        assert!(ram.write(Address(60), &[1, 2, 3, 4]));
        assert!(!ram.write(Address(62), &[1, 2, 3, 4]));

        let mut buf = [0; 4];
        assert!(ram.read(Address(0x8000_003C), &mut buf));
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(!ram.read(Address(u32::MAX), &mut buf));
    }
}

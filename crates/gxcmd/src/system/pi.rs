//! Processor interface (PI) side of the FIFO: the gather pipe.
use bitos::bitos;
use bitos::integer::u26;
use strum::FromRepr;

use crate::Address;
use crate::Primitive;
use crate::system::fifo::BURST_SIZE;

/// A PI FIFO register, as an offset in the processor interface MMIO window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum Reg {
    FifoStart = 0x0C,
    FifoEnd = 0x10,
    FifoCurrent = 0x14,
}

#[bitos(32)]
#[derive(Default, Debug, Clone, Copy)]
pub struct FifoCurrent {
    #[bits(0..26)]
    pub base: u26,
    #[bits(29)]
    pub wrapped: bool,
}

impl FifoCurrent {
    pub fn address(&self) -> Address {
        Address(self.base().value())
    }

    pub fn set_address(&mut self, value: Address) {
        self.set_base(u26::new(value.value() & 0x03FF_FFFF));
    }
}

/// Gather pipe state.
#[derive(Debug)]
pub struct Interface {
    pub fifo_start: Address,
    /// First address past the FIFO.
    pub fifo_end: Address,
    pub fifo_current: FifoCurrent,

    queue: [u8; 40],
    queue_index: usize,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            fifo_start: Default::default(),
            fifo_end: Default::default(),
            fifo_current: Default::default(),

            queue: [0; 40],
            queue_index: 0,
        }
    }
}

impl Interface {
    pub fn read32(&self, offset: u16) -> u32 {
        match Reg::from_repr(offset) {
            Some(Reg::FifoStart) => self.fifo_start.value(),
            Some(Reg::FifoEnd) => self.fifo_end.value(),
            Some(Reg::FifoCurrent) => self.fifo_current.to_bits(),
            None => {
                tracing::warn!("read from unknown PI register 0x{offset:02X}");
                0
            }
        }
    }

    pub fn write32(&mut self, offset: u16, value: u32) {
        match Reg::from_repr(offset) {
            Some(Reg::FifoStart) => self.fifo_start = Address(value & 0x03FF_FFE0),
            Some(Reg::FifoEnd) => self.fifo_end = Address(value & 0x03FF_FFE0),
            Some(Reg::FifoCurrent) => {
                self.fifo_current = FifoCurrent::from_bits(value);
                let aligned = self.fifo_current.address().align_down();
                self.fifo_current.set_address(aligned);
            }
            None => tracing::warn!("write to unknown PI register 0x{offset:02X}: 0x{value:08X}"),
        }
    }

    /// Number of bytes queued in the gather pipe.
    pub fn pending(&self) -> usize {
        self.queue_index
    }

    /// Pushes a value into the gather pipe. Values are queued up until a whole burst is
    /// available, which is then returned along with the address it must be written to.
    pub fn push<P: Primitive>(&mut self, value: P) -> Option<(Address, [u8; BURST_SIZE as usize])> {
        value.write_be_bytes(&mut self.queue[self.queue_index..][..size_of::<P>()]);
        self.queue_index += size_of::<P>();

        if self.queue_index < BURST_SIZE as usize {
            return None;
        }

        let mut burst = [0; BURST_SIZE as usize];
        burst.copy_from_slice(&self.queue[..BURST_SIZE as usize]);
        self.queue.copy_within(BURST_SIZE as usize..self.queue_index, 0);
        self.queue_index -= BURST_SIZE as usize;

        let current = self.fifo_current.address();
        let mut next = current + BURST_SIZE;
        if next >= self.fifo_end {
            self.fifo_current.set_wrapped(true);
            next = self.fifo_start;
        }

        self.fifo_current.set_address(next);
        Some((current, burst))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bursts_every_32_bytes() {
        let mut pi = Interface::default();
        pi.write32(Reg::FifoStart as u16, 0x1000);
        pi.write32(Reg::FifoEnd as u16, 0x1040);
        pi.write32(Reg::FifoCurrent as u16, 0x1000);

        for i in 0..7u32 {
            assert!(pi.push(i).is_none());
        }

        assert!(pi.push(0xAAu8).is_none());
        let (addr, burst) = pi.push(0xBBBB_CCCCu32).unwrap();
        assert_eq!(addr, Address(0x1000));
        assert_eq!(burst[4..8], [0, 0, 0, 1]);
        assert_eq!(burst[28..32], [0xAA, 0xBB, 0xBB, 0xCC]);
        assert_eq!(pi.pending(), 1);

        assert!(pi.push(0xDDDDu16).is_none());
        assert_eq!(pi.pending(), 3);

        for _ in 0..29 {
            pi.push(0u8);
        }

        assert_eq!(pi.fifo_current.address(), Address(0x1000));
        assert!(pi.fifo_current.wrapped());
    }
}

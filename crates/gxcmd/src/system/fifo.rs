//! Command processor FIFO.
//!
//! The FIFO is shared by the producer, which appends bursts and writes the registers, and the
//! consumer, which drains it into the decode queue. Every field is an atomic updated by exactly one
//! of the two roles. The watermark and breakpoint flags are recomputed by whichever role moves a
//! pointer.
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use binrw::{BinRead, BinWrite};
use bitos::{BitUtils, bitos};
use strum::FromRepr;

use crate::Address;
use crate::stream::BinaryStream;
use crate::system::gx::cmd;
use crate::system::{DesyncError, Event, System};

/// Size of a gather pipe burst.
pub const BURST_SIZE: u32 = 32;

/// Mask of the FIFO pointer bits.
const POINTER_MASK: u32 = 0x03FF_FFE0;

/// A FIFO register, as an offset in the command processor MMIO window.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum Reg {
    Status            = 0x00,
    Control           = 0x02,
    Clear             = 0x04,
    Token             = 0x0E,

    BaseLow           = 0x20,
    BaseHigh          = 0x22,
    EndLow            = 0x24,
    EndHigh           = 0x26,
    HighWatermarkLow  = 0x28,
    HighWatermarkHigh = 0x2A,
    LowWatermarkLow   = 0x2C,
    LowWatermarkHigh  = 0x2E,
    DistanceLow       = 0x30,
    DistanceHigh      = 0x32,
    WritePtrLow       = 0x34,
    WritePtrHigh      = 0x36,
    ReadPtrLow        = 0x38,
    ReadPtrHigh       = 0x3A,
    BreakpointLow     = 0x3C,
    BreakpointHigh    = 0x3E,
}

/// CP status register
#[bitos(16)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    #[bits(0)]
    pub overflow: bool,
    #[bits(1)]
    pub underflow: bool,
    #[bits(2)]
    pub read_idle: bool,
    #[bits(3)]
    pub command_idle: bool,
    #[bits(4)]
    pub breakpoint: bool,
}

/// CP control register
#[bitos(16)]
#[derive(Debug, Clone, Copy)]
pub struct Control {
    #[bits(0)]
    pub read_enable: bool,
    #[bits(1)]
    pub breakpoint_enable: bool,
    #[bits(2)]
    pub overflow_interrupt: bool,
    #[bits(3)]
    pub underflow_interrupt: bool,
    #[bits(4)]
    pub linked: bool,
    #[bits(5)]
    pub breakpoint_interrupt: bool,
}

impl Default for Control {
    fn default() -> Self {
        Self::from_bits(0).with_linked(true)
    }
}

/// A plain copy of the FIFO registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(big)]
pub struct Registers {
    pub base: u32,
    pub end: u32,
    pub high_watermark: u32,
    pub low_watermark: u32,
    pub breakpoint: u32,
    pub write_ptr: u32,
    pub read_ptr: u32,
    pub safe_read_ptr: u32,
    pub distance: u32,
    pub control: u16,
    pub token: u16,
}

/// The FIFO shared between the producer and the consumer.
#[derive(Debug)]
pub struct Fifo {
    pub base: AtomicU32,
    /// Address of the last burst in the FIFO.
    pub end: AtomicU32,
    pub high_watermark: AtomicU32,
    pub low_watermark: AtomicU32,
    pub breakpoint: AtomicU32,
    /// Written by the producer.
    pub write_ptr: AtomicU32,
    /// Written by the consumer.
    pub read_ptr: AtomicU32,
    /// Read pointer of the last burst the consumer finished decoding.
    pub safe_read_ptr: AtomicU32,
    /// Bytes written but not yet read.
    pub distance: AtomicU32,
    pub control: AtomicU16,
    /// Last token written through bank A.
    pub token: AtomicU16,

    /// Distance is above the high watermark.
    pub overflow: AtomicBool,
    /// Distance is below the low watermark.
    pub underflow: AtomicBool,
    pub breakpoint_hit: AtomicBool,
    /// Current level of the CP interrupt line.
    interrupt: AtomicBool,

    /// The consumer must drop its decode queue.
    pub reset_queue: AtomicBool,
    /// The producer wrote past the end of the FIFO.
    pub overflowed: AtomicBool,
    /// The consumer stopped after a desync.
    pub halted: AtomicBool,
    /// Every spin loop must exit.
    pub shutdown: AtomicBool,
}

impl Default for Fifo {
    fn default() -> Self {
        Self {
            base: AtomicU32::new(0),
            end: AtomicU32::new(0),
            high_watermark: AtomicU32::new(0),
            low_watermark: AtomicU32::new(0),
            breakpoint: AtomicU32::new(0),
            write_ptr: AtomicU32::new(0),
            read_ptr: AtomicU32::new(0),
            safe_read_ptr: AtomicU32::new(0),
            distance: AtomicU32::new(0),
            control: AtomicU16::new(Control::default().to_bits()),
            token: AtomicU16::new(0),
            overflow: AtomicBool::new(false),
            underflow: AtomicBool::new(false),
            breakpoint_hit: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            reset_queue: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }
}

#[inline(always)]
fn low(word: u32, value: u16) -> u32 {
    word.with_bits(0, 16, value as u32)
}

#[inline(always)]
fn high(word: u32, value: u16) -> u32 {
    word.with_bits(16, 32, value as u32)
}

impl Fifo {
    pub fn control(&self) -> Control {
        Control::from_bits(self.control.load(Ordering::Acquire))
    }

    /// Spins until `condition` holds or the FIFO shuts down. Returns whether the condition held.
    pub fn spin_until(&self, mut condition: impl FnMut() -> bool) -> bool {
        let mut spins = 0u32;
        loop {
            if condition() {
                return true;
            }

            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }

            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Advances a pointer by a burst, wrapping from the end back to the base.
    fn next(&self, ptr: u32) -> u32 {
        if ptr == self.end.load(Ordering::Acquire) {
            self.base.load(Ordering::Acquire)
        } else {
            ptr.wrapping_add(BURST_SIZE) & POINTER_MASK
        }
    }

    /// Recomputes the watermark and breakpoint flags from the pointers.
    pub fn recompute(&self) {
        let distance = self.distance.load(Ordering::Acquire);
        let control = self.control();

        self.overflow.store(
            distance > self.high_watermark.load(Ordering::Acquire),
            Ordering::Release,
        );
        self.underflow.store(
            distance < self.low_watermark.load(Ordering::Acquire),
            Ordering::Release,
        );

        let hit = control.read_enable()
            && control.breakpoint_enable()
            && self.read_ptr.load(Ordering::Acquire) == self.breakpoint.load(Ordering::Acquire);

        if hit && !self.breakpoint_hit.swap(true, Ordering::AcqRel) {
            tracing::debug!("hit FIFO breakpoint");
        } else if !hit {
            self.breakpoint_hit.store(false, Ordering::Release);
        }
    }

    /// Whether the CP interrupt should be asserted given the current flags.
    pub fn should_interrupt(&self) -> bool {
        let control = self.control();
        let breakpoint =
            self.breakpoint_hit.load(Ordering::Acquire) && control.breakpoint_interrupt();
        let overflow = self.overflow.load(Ordering::Acquire) && control.overflow_interrupt();
        let underflow = self.underflow.load(Ordering::Acquire) && control.underflow_interrupt();

        control.read_enable() && (breakpoint || overflow || underflow)
    }

    /// Updates the interrupt line, returning its new level if it changed.
    pub fn update_interrupt(&self) -> Option<bool> {
        let level = self.should_interrupt();
        (self.interrupt.swap(level, Ordering::AcqRel) != level).then_some(level)
    }

    /// Whether the consumer must stop at the breakpoint.
    pub fn at_breakpoint(&self) -> bool {
        let control = self.control();
        control.breakpoint_enable() && self.breakpoint_hit.load(Ordering::Acquire)
    }

    pub fn status(&self, queue_empty: bool) -> Status {
        let read_idle =
            !self.control().read_enable() || self.distance.load(Ordering::Acquire) == 0;

        Status::default()
            .with_overflow(self.overflow.load(Ordering::Acquire))
            .with_underflow(self.underflow.load(Ordering::Acquire))
            .with_read_idle(read_idle)
            .with_command_idle(read_idle && queue_empty)
            .with_breakpoint(self.breakpoint_hit.load(Ordering::Acquire))
    }

    /// Reads a 16-bit register.
    pub fn read16(&self, offset: u16) -> u16 {
        let Some(reg) = Reg::from_repr(offset) else {
            tracing::warn!("read from unknown CP register 0x{offset:02X}");
            return 0;
        };

        let word = |field: &AtomicU32| field.load(Ordering::Acquire);
        match reg {
            Reg::Status => {
                let queue_empty =
                    self.safe_read_ptr.load(Ordering::Acquire) == word(&self.read_ptr);
                self.status(queue_empty).to_bits()
            }
            Reg::Control => self.control.load(Ordering::Acquire),
            Reg::Clear => 0,
            Reg::Token => self.token.load(Ordering::Acquire),
            Reg::BaseLow => word(&self.base) as u16,
            Reg::BaseHigh => (word(&self.base) >> 16) as u16,
            Reg::EndLow => word(&self.end) as u16,
            Reg::EndHigh => (word(&self.end) >> 16) as u16,
            Reg::HighWatermarkLow => word(&self.high_watermark) as u16,
            Reg::HighWatermarkHigh => (word(&self.high_watermark) >> 16) as u16,
            Reg::LowWatermarkLow => word(&self.low_watermark) as u16,
            Reg::LowWatermarkHigh => (word(&self.low_watermark) >> 16) as u16,
            Reg::DistanceLow => word(&self.distance) as u16,
            Reg::DistanceHigh => (word(&self.distance) >> 16) as u16,
            Reg::WritePtrLow => word(&self.write_ptr) as u16,
            Reg::WritePtrHigh => (word(&self.write_ptr) >> 16) as u16,
            Reg::ReadPtrLow => word(&self.read_ptr) as u16,
            Reg::ReadPtrHigh => (word(&self.read_ptr) >> 16) as u16,
            Reg::BreakpointLow => word(&self.breakpoint) as u16,
            Reg::BreakpointHigh => (word(&self.breakpoint) >> 16) as u16,
        }
    }

    /// Writes a 16-bit register, returning the new interrupt level if it changed.
    pub fn write16(&self, offset: u16, value: u16) -> Option<bool> {
        let Some(reg) = Reg::from_repr(offset) else {
            tracing::warn!("write to unknown CP register 0x{offset:02X}: 0x{value:04X}");
            return None;
        };

        let update = |field: &AtomicU32, f: fn(u32, u16) -> u32, value: u16, mask: u32| {
            let current = field.load(Ordering::Acquire);
            field.store(f(current, value) & mask, Ordering::Release);
        };

        match reg {
            Reg::Status | Reg::Token => {
                tracing::warn!("write to read-only CP register {reg:?}: 0x{value:04X}");
                return None;
            }
            Reg::Control => {
                self.control.store(value, Ordering::Release);
                tracing::debug!(control = ?self.control(), "CP control changed");
            }
            Reg::Clear => {
                if value.bit(0) {
                    self.overflow.store(false, Ordering::Release);
                }

                if value.bit(1) {
                    self.underflow.store(false, Ordering::Release);
                }

                return self.update_interrupt();
            }
            Reg::BaseLow => update(&self.base, low, value, POINTER_MASK),
            Reg::BaseHigh => update(&self.base, high, value, POINTER_MASK),
            Reg::EndLow => update(&self.end, low, value, POINTER_MASK),
            Reg::EndHigh => update(&self.end, high, value, POINTER_MASK),
            Reg::HighWatermarkLow => update(&self.high_watermark, low, value, POINTER_MASK),
            Reg::HighWatermarkHigh => update(&self.high_watermark, high, value, POINTER_MASK),
            Reg::LowWatermarkLow => update(&self.low_watermark, low, value, POINTER_MASK),
            Reg::LowWatermarkHigh => update(&self.low_watermark, high, value, POINTER_MASK),
            Reg::DistanceLow => update(&self.distance, low, value, POINTER_MASK),
            Reg::DistanceHigh => {
                update(&self.distance, high, value, POINTER_MASK);
                if self.distance.load(Ordering::Acquire) == 0 {
                    tracing::debug!("FIFO distance cleared, resetting decode queue");
                    self.reset_queue.store(true, Ordering::Release);
                }
            }
            Reg::WritePtrLow => update(&self.write_ptr, low, value, POINTER_MASK),
            Reg::WritePtrHigh => update(&self.write_ptr, high, value, POINTER_MASK),
            Reg::ReadPtrLow => update(&self.read_ptr, low, value, POINTER_MASK),
            Reg::ReadPtrHigh => {
                update(&self.read_ptr, high, value, POINTER_MASK);
                let read = self.read_ptr.load(Ordering::Acquire);
                self.safe_read_ptr.store(read, Ordering::Release);
            }
            Reg::BreakpointLow => update(&self.breakpoint, low, value, POINTER_MASK),
            Reg::BreakpointHigh => update(&self.breakpoint, high, value, POINTER_MASK),
        }

        self.recompute();
        self.update_interrupt()
    }

    /// Accounts for a burst the producer wrote at the write pointer. Returns the new interrupt
    /// level if it changed.
    ///
    /// The burst itself must already be in memory. A burst that does not fit is dropped: neither
    /// the write pointer nor the distance move, and the FIFO is flagged as overflowed.
    pub fn push_burst(&self) -> Option<bool> {
        let capacity = self
            .end
            .load(Ordering::Acquire)
            .wrapping_sub(self.base.load(Ordering::Acquire));
        let accepted = self
            .distance
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |distance| {
                let distance = distance + BURST_SIZE;
                (distance <= capacity).then_some(distance)
            });

        match accepted {
            Ok(_) => {
                let write = self.write_ptr.load(Ordering::Acquire);
                self.write_ptr.store(self.next(write), Ordering::Release);
            }
            Err(distance) => {
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    tracing::error!(distance, capacity, "FIFO overflowed by the gather pipe");
                }
            }
        }

        self.recompute();
        self.update_interrupt()
    }

    /// Copies the registers out.
    pub fn registers(&self) -> Registers {
        Registers {
            base: self.base.load(Ordering::Acquire),
            end: self.end.load(Ordering::Acquire),
            high_watermark: self.high_watermark.load(Ordering::Acquire),
            low_watermark: self.low_watermark.load(Ordering::Acquire),
            breakpoint: self.breakpoint.load(Ordering::Acquire),
            write_ptr: self.write_ptr.load(Ordering::Acquire),
            read_ptr: self.read_ptr.load(Ordering::Acquire),
            safe_read_ptr: self.safe_read_ptr.load(Ordering::Acquire),
            distance: self.distance.load(Ordering::Acquire),
            control: self.control.load(Ordering::Acquire),
            token: self.token.load(Ordering::Acquire),
        }
    }

    /// Overwrites the registers and recomputes the flags.
    pub fn restore(&self, regs: &Registers) {
        self.base.store(regs.base, Ordering::Release);
        self.end.store(regs.end, Ordering::Release);
        self.high_watermark
            .store(regs.high_watermark, Ordering::Release);
        self.low_watermark.store(regs.low_watermark, Ordering::Release);
        self.breakpoint.store(regs.breakpoint, Ordering::Release);
        self.write_ptr.store(regs.write_ptr, Ordering::Release);
        self.read_ptr.store(regs.read_ptr, Ordering::Release);
        self.safe_read_ptr.store(regs.safe_read_ptr, Ordering::Release);
        self.distance.store(regs.distance, Ordering::Release);
        self.control.store(regs.control, Ordering::Release);
        self.token.store(regs.token, Ordering::Release);
        self.overflowed.store(false, Ordering::Release);
        self.recompute();
    }
}

/// Drains the FIFO into the decode queue and executes every complete command.
///
/// Returns once the FIFO is empty, reading is disabled, the breakpoint is hit or the consumer
/// halts.
pub fn consume(sys: &mut System) {
    let fifo = sys.fifo.clone();
    if fifo.reset_queue.swap(false, Ordering::AcqRel) {
        sys.queue.clear();
        sys.dlists.clear();
    }

    if sys.halted {
        return;
    }

    if fifo.overflowed.load(Ordering::Acquire) {
        sys.halt(DesyncError::Overflow);
        return;
    }

    loop {
        fifo.recompute();
        if !fifo.control().read_enable()
            || fifo.at_breakpoint()
            || fifo.distance.load(Ordering::Acquire) == 0
        {
            break;
        }

        let read = fifo.read_ptr.load(Ordering::Acquire);
        let mut burst = [0; BURST_SIZE as usize];
        if !sys.modules.mem.read(Address(read), &mut burst) {
            sys.halt(DesyncError::OutOfBounds(Address(read)));
            return;
        }

        sys.queue.push_bytes(&burst);
        let next = fifo.next(read);
        fifo.read_ptr.store(next, Ordering::Release);
        fifo.distance.fetch_sub(BURST_SIZE, Ordering::AcqRel);

        self::execute_queue(sys);
        fifo.safe_read_ptr.store(next, Ordering::Release);

        fifo.recompute();
        if let Some(level) = fifo.update_interrupt() {
            sys.send(Event::CpInterrupt(level));
        }

        if sys.halted {
            return;
        }
    }

    if let Some(level) = fifo.update_interrupt() {
        sys.send(Event::CpInterrupt(level));
    }
}

/// Runs every complete command in the decode queue.
pub fn execute_queue(sys: &mut System) {
    let mut queue = std::mem::take(&mut sys.queue);
    queue.prepare();

    let result = cmd::run(sys, queue.data(), None);
    match result {
        Ok(consumed) => queue.consume(consumed),
        Err(err) => {
            queue.clear();
            sys.halt(err);
        }
    }

    sys.queue = queue;
}

#[cfg(test)]
mod test {
    use super::*;

    fn fifo(base: u32, end: u32) -> Fifo {
        let fifo = Fifo::default();
        fifo.write16(Reg::BaseLow as u16, base as u16);
        fifo.write16(Reg::BaseHigh as u16, (base >> 16) as u16);
        fifo.write16(Reg::EndLow as u16, end as u16);
        fifo.write16(Reg::EndHigh as u16, (end >> 16) as u16);
        fifo.write16(Reg::WritePtrLow as u16, base as u16);
        fifo.write16(Reg::WritePtrHigh as u16, (base >> 16) as u16);
        fifo.write16(Reg::ReadPtrLow as u16, base as u16);
        fifo.write16(Reg::ReadPtrHigh as u16, (base >> 16) as u16);
        fifo
    }

    #[test]
    fn halves_compose_words() {
        let fifo = fifo(0x0012_3440, 0x0012_8000);
        assert_eq!(fifo.base.load(Ordering::Relaxed), 0x0012_3440);
        assert_eq!(fifo.read16(Reg::BaseLow as u16), 0x3440);
        assert_eq!(fifo.read16(Reg::BaseHigh as u16), 0x0012);

        // pointers are burst aligned
        fifo.write16(Reg::BreakpointLow as u16, 0x1237);
        assert_eq!(fifo.breakpoint.load(Ordering::Relaxed), 0x1220);
    }

    #[test]
    fn bursts_wrap_and_track_distance() {
        let fifo = fifo(0x1000, 0x1060);
        for _ in 0..3 {
            fifo.push_burst();
        }

        assert_eq!(fifo.write_ptr.load(Ordering::Relaxed), 0x1060);
        assert_eq!(fifo.distance.load(Ordering::Relaxed), 0x60);

        // the consumer frees a burst
        fifo.distance.fetch_sub(BURST_SIZE, Ordering::Relaxed);
        fifo.push_burst();
        assert_eq!(fifo.write_ptr.load(Ordering::Relaxed), 0x1000);
        assert_eq!(fifo.distance.load(Ordering::Relaxed), 0x60);
        assert!(!fifo.overflowed.load(Ordering::Relaxed));
    }

    #[test]
    fn overflowing_burst_is_dropped() {
        let fifo = fifo(0x1000, 0x1060);
        for _ in 0..3 {
            fifo.push_burst();
        }

        fifo.push_burst();
        assert!(fifo.overflowed.load(Ordering::Relaxed));
        assert_eq!(fifo.write_ptr.load(Ordering::Relaxed), 0x1060);
        assert_eq!(fifo.distance.load(Ordering::Relaxed), 0x60);

        // pointers and distance still agree
        let write = fifo.write_ptr.load(Ordering::Relaxed);
        let read = fifo.read_ptr.load(Ordering::Relaxed);
        assert_eq!(write - read, fifo.distance.load(Ordering::Relaxed));
    }

    #[test]
    fn distance_never_exceeds_capacity() {
        let fifo = fifo(0x1000, 0x1100);
        let capacity = 0x100;
        for i in 0..64 {
            fifo.push_burst();
            if i % 3 == 0 {
                fifo.distance.fetch_sub(BURST_SIZE, Ordering::Relaxed);
            }

            assert!(fifo.distance.load(Ordering::Relaxed) <= capacity);
        }
    }

    #[test]
    fn watermark_interrupts() {
        let fifo = fifo(0x1000, 0x2000);
        fifo.write16(Reg::HighWatermarkLow as u16, 0x40);
        fifo.write16(Reg::LowWatermarkLow as u16, 0x20);
        let control = Control::default()
            .with_read_enable(true)
            .with_overflow_interrupt(true);

        assert_eq!(fifo.write16(Reg::Control as u16, control.to_bits()), None);
        assert!(fifo.underflow.load(Ordering::Relaxed));

        fifo.push_burst();
        fifo.push_burst();
        assert_eq!(fifo.push_burst(), Some(true));
        assert!(fifo.status(false).overflow());

        fifo.distance.store(0, Ordering::Relaxed);
        fifo.recompute();
        assert_eq!(fifo.update_interrupt(), Some(false));
    }

    #[test]
    fn read_only_registers() {
        let fifo = fifo(0x1000, 0x2000);
        fifo.token.store(0x1234, Ordering::Relaxed);
        fifo.write16(Reg::Token as u16, 0x5555);
        assert_eq!(fifo.read16(Reg::Token as u16), 0x1234);
    }

    #[test]
    fn clearing_distance_resets_queue() {
        let fifo = fifo(0x1000, 0x2000);
        fifo.push_burst();
        fifo.write16(Reg::DistanceLow as u16, 0);
        assert!(!fifo.reset_queue.load(Ordering::Relaxed));
        fifo.write16(Reg::DistanceHigh as u16, 0);
        assert!(fifo.reset_queue.load(Ordering::Relaxed));
    }

    #[test]
    fn breakpoint_is_hit_at_read_pointer() {
        let fifo = fifo(0x1000, 0x2000);
        fifo.write16(Reg::BreakpointLow as u16, 0x1000);
        let control = Control::default()
            .with_read_enable(true)
            .with_breakpoint_enable(true)
            .with_breakpoint_interrupt(true);

        assert_eq!(fifo.write16(Reg::Control as u16, control.to_bits()), Some(true));
        assert!(fifo.at_breakpoint());
        assert!(fifo.status(true).breakpoint());
    }
}

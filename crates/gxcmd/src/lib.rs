//! Front end of the GameCube/Wii GX: the command processor FIFO, the command decoder and the
//! vertex pipeline feeding a render backend.

pub mod address;
pub mod modules;
pub mod primitive;
pub mod stream;
pub mod system;

#[cfg(test)]
mod test;

pub use address::Address;
pub use primitive::Primitive;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crate::modules::memory::MemoryModule;
use crate::system::fifo::{self, Fifo};
use crate::system::gx::pix::InterruptStatus;
use crate::system::{Config, Event, Modules, StateError, System, pi, state};

/// A request from the producer, serviced by the consumer thread.
enum Request {
    Save(oneshot::Sender<Result<Vec<u8>, StateError>>),
    Load(Vec<u8>, oneshot::Sender<Result<(), StateError>>),
    InvalidateMemory(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
}

fn serve(sys: &mut System, request: Request) {
    // a dropped receiver means the producer stopped waiting
    match request {
        Request::Save(reply) => _ = reply.send(state::save(sys)),
        Request::Load(data, reply) => _ = reply.send(state::load(sys, &data)),
        Request::InvalidateMemory(reply) => {
            sys.invalidate_memory();
            _ = reply.send(());
        }
        Request::Reset(reply) => {
            sys.reset();
            _ = reply.send(());
        }
    }
}

/// Whether the consumer can make progress on the FIFO.
fn has_work(fifo: &Fifo) -> bool {
    if fifo.reset_queue.load(Ordering::Acquire) || fifo.overflowed.load(Ordering::Acquire) {
        return true;
    }

    fifo.control().read_enable()
        && !fifo.at_breakpoint()
        && fifo.distance.load(Ordering::Acquire) > 0
}

/// Whether the consumer cannot drain the FIFO any further without help from the producer.
fn stalled(fifo: &Fifo) -> bool {
    fifo.halted.load(Ordering::Acquire) || !fifo.control().read_enable() || fifo.at_breakpoint()
}

fn worker(mut sys: System, requests: flume::Receiver<Request>) {
    let fifo = sys.fifo.clone();
    tracing::debug!("consumer thread started");

    loop {
        for request in requests.try_iter() {
            self::serve(&mut sys, request);
        }

        fifo::consume(&mut sys);

        let halted = sys.halted();
        let woke = fifo.spin_until(|| !requests.is_empty() || (!halted && self::has_work(&fifo)));
        if !woke {
            break;
        }
    }

    tracing::debug!("consumer thread stopped");
}

/// Spins the producer while the FIFO is above its high watermark, until the consumer drains it
/// below the low watermark or cannot drain it at all.
fn throttle(fifo: &Fifo) {
    if !fifo.overflow.load(Ordering::Acquire) {
        return;
    }

    tracing::trace!("throttling producer");
    fifo.spin_until(|| {
        fifo.underflow.load(Ordering::Acquire)
            || fifo.distance.load(Ordering::Acquire) == 0
            || self::stalled(fifo)
    });
}

/// Sends a request to the consumer thread and spins until it is serviced.
fn request<T>(
    fifo: &Fifo,
    requests: &flume::Sender<Request>,
    request: Request,
    receiver: oneshot::Receiver<T>,
) -> Result<T, StateError> {
    requests.send(request).map_err(|_| StateError::Shutdown)?;

    let mut reply = None;
    fifo.spin_until(|| match receiver.try_recv() {
        Ok(value) => {
            reply = Some(value);
            true
        }
        Err(oneshot::TryRecvError::Empty) => false,
        Err(oneshot::TryRecvError::Disconnected) => true,
    });

    reply.ok_or(StateError::Shutdown)
}

enum Backend {
    /// The consumer runs on the producer's thread, right after every burst.
    Inline(Box<System>),
    /// The consumer runs on its own thread.
    Threaded {
        requests: flume::Sender<Request>,
        handle: Option<JoinHandle<()>>,
    },
}

/// The producer side of the command processor: the CPU facing half of the GX.
pub struct Gx {
    /// The FIFO, shared with the consumer.
    fifo: Arc<Fifo>,
    /// Emulated memory, shared with the consumer.
    mem: Arc<dyn MemoryModule>,
    /// The processor interface gather pipe.
    pub processor: pi::Interface,
    /// Notifications from the consumer.
    events: flume::Receiver<Event>,
    /// Where the consumer runs.
    backend: Backend,
    /// Level of the CP interrupt line.
    cp_interrupt: bool,
    /// Pixel engine interrupt status.
    pe: InterruptStatus,
}

impl Gx {
    /// Creates the GX. In dual core mode, this spawns the consumer thread.
    pub fn new(modules: Modules, config: Config) -> std::io::Result<Self> {
        let sys = System::new(modules, config);
        let fifo = sys.fifo.clone();
        let mem = sys.modules.mem.clone();
        let events = sys.events();

        let backend = if sys.config.dual_core {
            let (requests, receiver) = flume::unbounded();
            let handle = std::thread::Builder::new()
                .name("gxcmd consumer".into())
                .spawn(move || self::worker(sys, receiver))?;

            Backend::Threaded {
                requests,
                handle: Some(handle),
            }
        } else {
            Backend::Inline(Box::new(sys))
        };

        Ok(Self {
            fifo,
            mem,
            processor: pi::Interface::default(),
            events,
            backend,
            cp_interrupt: false,
            pe: InterruptStatus::default(),
        })
    }

    /// The consumer, if it runs on this thread.
    pub fn system(&self) -> Option<&System> {
        match &self.backend {
            Backend::Inline(sys) => Some(sys),
            Backend::Threaded { .. } => None,
        }
    }

    /// The consumer, if it runs on this thread.
    pub fn system_mut(&mut self) -> Option<&mut System> {
        match &mut self.backend {
            Backend::Inline(sys) => Some(sys),
            Backend::Threaded { .. } => None,
        }
    }

    pub fn fifo(&self) -> &Fifo {
        &self.fifo
    }

    /// Whether the consumer stopped after a desync.
    pub fn halted(&self) -> bool {
        self.fifo.halted.load(Ordering::Acquire)
    }

    /// Level of the CP interrupt line.
    pub fn cp_interrupt(&self) -> bool {
        self.cp_interrupt
    }

    /// Whether the pixel engine is raising its token interrupt.
    pub fn pe_token_interrupt(&self) -> bool {
        self.pe.token_raised()
    }

    /// Whether the pixel engine is raising its finish interrupt.
    pub fn pe_finish_interrupt(&self) -> bool {
        self.pe.finish_raised()
    }

    fn set_cp_interrupt(&mut self, level: Option<bool>) {
        if let Some(level) = level {
            tracing::trace!(level, "CP interrupt changed");
            self.cp_interrupt = level;
        }
    }

    /// Applies every pending notification from the consumer.
    pub fn process_events(&mut self) {
        for event in self.events.try_iter() {
            match event {
                Event::CpInterrupt(level) => self.cp_interrupt = level,
                Event::Token { interrupt, .. } => {
                    if interrupt {
                        self.pe.set_token(true);
                    }
                }
                Event::Finish => self.pe.set_finish(true),
                Event::Halted => tracing::warn!("command processor halted"),
            }
        }
    }

    /// Runs the consumer inline, if that is where it lives.
    fn kick(&mut self) {
        if let Backend::Inline(sys) = &mut self.backend {
            fifo::consume(sys);
        }
    }

    /// Writes a value to the gather pipe. Every completed burst is written to memory and, if the
    /// FIFO is linked, appended to it.
    pub fn write_gather_pipe<P: Primitive>(&mut self, value: P) {
        let Some((addr, burst)) = self.processor.push(value) else {
            return;
        };

        if !self.mem.write(addr, &burst) {
            tracing::warn!("gather pipe burst to unmapped address {addr}");
        }

        if !self.fifo.control().linked() {
            return;
        }

        let level = self.fifo.push_burst();
        self.set_cp_interrupt(level);

        match &mut self.backend {
            Backend::Inline(sys) => fifo::consume(sys),
            Backend::Threaded { .. } => self::throttle(&self.fifo),
        }

        self.process_events();
    }

    /// Reads a 16-bit CP register.
    pub fn read_cp16(&mut self, offset: u16) -> u16 {
        self.process_events();
        self.fifo.read16(offset)
    }

    /// Writes a 16-bit CP register.
    pub fn write_cp16(&mut self, offset: u16, value: u16) {
        let level = self.fifo.write16(offset, value);
        self.set_cp_interrupt(level);
        self.kick();
        self.process_events();
    }

    /// Reads a 32-bit PI FIFO register.
    pub fn read_pi32(&self, offset: u16) -> u32 {
        self.processor.read32(offset)
    }

    /// Writes a 32-bit PI FIFO register.
    pub fn write_pi32(&mut self, offset: u16, value: u32) {
        self.processor.write32(offset, value);
    }

    /// Reads the pixel engine interrupt status register.
    pub fn read_pe_interrupt(&mut self) -> u16 {
        self.process_events();
        self.pe.to_bits()
    }

    /// Writes the pixel engine interrupt status register.
    pub fn write_pe_interrupt(&mut self, value: u16) {
        self.process_events();
        self.pe.write(value);
    }

    /// Waits for the consumer to drain the FIFO. Returns whether the FIFO is empty, which is not
    /// the case if the consumer is halted, reading is disabled or a breakpoint was hit.
    pub fn sync(&mut self) -> bool {
        match &mut self.backend {
            Backend::Inline(sys) => fifo::consume(sys),
            Backend::Threaded { .. } => {
                let fifo = &self.fifo;
                fifo.spin_until(|| {
                    let drained = fifo.distance.load(Ordering::Acquire) == 0
                        && fifo.safe_read_ptr.load(Ordering::Acquire)
                            == fifo.read_ptr.load(Ordering::Acquire);

                    drained || self::stalled(fifo)
                });
            }
        }

        self.process_events();
        self.fifo.distance.load(Ordering::Acquire) == 0
    }

    /// Drains the FIFO and serializes the state of the consumer.
    pub fn save_state(&mut self) -> Result<Vec<u8>, StateError> {
        self.sync();
        match &mut self.backend {
            Backend::Inline(sys) => state::save(sys),
            Backend::Threaded { requests, .. } => {
                let (reply, receiver) = oneshot::channel();
                self::request(&self.fifo, requests, Request::Save(reply), receiver)?
            }
        }
    }

    /// Restores the state of the consumer.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        self.sync();
        let result = match &mut self.backend {
            Backend::Inline(sys) => state::load(sys, data),
            Backend::Threaded { requests, .. } => {
                let (reply, receiver) = oneshot::channel();
                let request = Request::Load(data.to_vec(), reply);
                self::request(&self.fifo, requests, request, receiver)?
            }
        };

        self.process_events();
        result
    }

    /// Drops every cache that depends on the contents of memory.
    pub fn invalidate_memory(&mut self) -> Result<(), StateError> {
        match &mut self.backend {
            Backend::Inline(sys) => sys.invalidate_memory(),
            Backend::Threaded { requests, .. } => {
                let (reply, receiver) = oneshot::channel();
                let request = Request::InvalidateMemory(reply);
                self::request(&self.fifo, requests, request, receiver)?;
            }
        }

        Ok(())
    }

    /// Resets the command processor, including a halted consumer.
    pub fn reset(&mut self) -> Result<(), StateError> {
        match &mut self.backend {
            Backend::Inline(sys) => sys.reset(),
            Backend::Threaded { requests, .. } => {
                let (reply, receiver) = oneshot::channel();
                self::request(&self.fifo, requests, Request::Reset(reply), receiver)?;
            }
        }

        // stale notifications belong to the previous session
        _ = self.events.drain();
        self.processor = pi::Interface::default();
        self.cp_interrupt = false;
        self.pe = InterruptStatus::default();

        Ok(())
    }
}

impl Drop for Gx {
    fn drop(&mut self) {
        self.fifo.shutdown.store(true, Ordering::Release);
        if let Backend::Threaded { handle, .. } = &mut self.backend
            && let Some(handle) = handle.take()
            && handle.join().is_err()
        {
            tracing::error!("consumer thread panicked");
        }
    }
}

//! State of the command processor front end (i.e. the consumer side of the FIFO).

pub mod fifo;
pub mod gx;
pub mod pi;
pub mod state;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytesize::ByteSize;
use easyerr::Error;

use crate::Address;
use crate::modules::memory::MemoryModule;
use crate::modules::render::RenderModule;
use crate::modules::shader::ShaderModule;
use crate::stream::BinRingBuffer;
use crate::system::fifo::Fifo;
use crate::system::gx::{Gpu, dlist, loader, vertex};

pub use state::StateError;

/// System configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether the consumer runs on its own thread.
    pub dual_core: bool,
    /// Whether triangles are generated as strips separated by a restart index.
    pub primitive_restart: bool,
    /// Whether display lists are analysed, compiled and replayed.
    pub display_list_cache: bool,
    /// A running display list is checked for changes once every this many calls.
    pub display_list_check_interval: u32,
    /// Size of the recorded display lists above which the whole cache is dropped.
    pub display_list_budget: usize,
    /// Capacity of the native vertex buffer, in bytes.
    pub vertex_buffer_size: usize,
    /// Capacity of each index buffer, in indices.
    pub index_buffer_size: usize,
    /// How deep display list calls can nest.
    pub max_call_depth: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dual_core: false,
            primitive_restart: false,
            display_list_cache: true,
            display_list_check_interval: 8,
            display_list_budget: ByteSize::mib(32).as_u64() as usize,
            vertex_buffer_size: ByteSize::mib(4).as_u64() as usize,
            index_buffer_size: 64 * 1024,
            max_call_depth: 4,
        }
    }
}

/// System modules.
pub struct Modules {
    pub render: Box<dyn RenderModule>,
    pub shader: Box<dyn ShaderModule>,
    pub mem: Arc<dyn MemoryModule>,
}

/// A notification from the consumer to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The CP interrupt line changed level.
    CpInterrupt(bool),
    /// A token was written through bank A.
    Token { token: u16, interrupt: bool },
    /// Drawing finished.
    Finish,
    /// The consumer desynced and stopped decoding.
    Halted,
}

/// Counters of what the consumer did.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Batches sent to the renderer.
    pub flushes: u64,
    /// Vertices decoded.
    pub vertices: u64,
    /// Display list calls served by a recorded routine.
    pub dlist_hits: u64,
    /// Display lists recorded.
    pub dlist_compiles: u64,
    /// Display list calls that fell back to interpretation after being cached.
    pub dlist_fallbacks: u64,
    /// Distinct vertex loaders built.
    pub loaders_built: u64,
}

/// A fatal inconsistency in the command stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesyncError {
    #[error("unknown opcode 0x{f0:02X}")]
    UnknownOpcode(u8),
    #[error("FIFO overflowed")]
    Overflow,
    #[error("FIFO data at unmapped address {f0}")]
    OutOfBounds(Address),
}

/// System state.
pub struct System {
    /// System configuration.
    pub config: Config,
    /// System modules.
    pub modules: Modules,
    /// The FIFO, shared with the producer.
    pub fifo: Arc<Fifo>,
    /// Bytes read from the FIFO but not decoded yet.
    pub queue: BinRingBuffer,
    /// The GPU register banks.
    pub gpu: Gpu,
    /// Vertex loaders.
    pub loaders: loader::Cache,
    /// Pending vertices.
    pub vertices: vertex::Manager,
    /// Display lists.
    pub dlists: dlist::Cache,
    /// Counters.
    pub stats: Stats,
    /// Whether decoding stopped after a desync.
    pub halted: bool,
    /// How many display list calls are currently nested.
    pub call_depth: u8,
    /// Notifications for the producer.
    events: (flume::Sender<Event>, flume::Receiver<Event>),
}

impl System {
    pub fn new(modules: Modules, config: Config) -> Self {
        Self {
            modules,
            fifo: Arc::new(Fifo::default()),
            queue: BinRingBuffer::default(),
            gpu: Gpu::default(),
            loaders: loader::Cache::default(),
            vertices: vertex::Manager::new(&config),
            dlists: dlist::Cache::default(),
            stats: Stats::default(),
            halted: false,
            call_depth: 0,
            events: flume::unbounded(),

            config,
        }
    }

    /// Sends a notification to the producer.
    pub fn send(&self, event: Event) {
        // the producer may be gone while shutting down
        _ = self.events.0.send(event);
    }

    /// Returns a receiver of the notifications sent to the producer.
    pub fn events(&self) -> flume::Receiver<Event> {
        self.events.1.clone()
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Stops decoding after a desync.
    pub fn halt(&mut self, err: DesyncError) {
        let fifo = self.fifo.registers();
        tracing::error!(
            ?fifo,
            queued = self.queue.len(),
            call_depth = self.call_depth,
            "command stream desynced: {err}"
        );

        self.halted = true;
        self.fifo.halted.store(true, Ordering::Release);
        self.send(Event::Halted);
    }

    /// Drops every cached display list and vertex loader. Must be called whenever emulated memory
    /// is remapped.
    pub fn invalidate_memory(&mut self) {
        self.dlists.clear();
        self.loaders.clear();
    }

    /// Resets the consumer to its power-on state. This is the only way out of a desync.
    pub fn reset(&mut self) {
        tracing::debug!("resetting command processor");
        self.fifo.restore(&fifo::Registers::default());
        self.fifo.halted.store(false, Ordering::Release);
        self.fifo.reset_queue.store(false, Ordering::Release);

        self.queue.clear();
        self.gpu = Gpu::default();
        self.vertices.reset();
        self.loaders.clear();
        self.dlists.clear();
        self.halted = false;
        self.call_depth = 0;
    }
}

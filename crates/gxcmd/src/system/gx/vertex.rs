//! Vertex batching.
//!
//! Decoded vertices accumulate in a native vertex buffer, indexed by the index generator, until
//! something forces the batch out to the renderer: a change of vertex format or primitive class,
//! a full buffer, or a register write that would alter how the pending vertices are drawn.
use std::sync::Arc;

use crate::modules::memory::MemoryModule;
use crate::modules::render::{Action, Batch};
use crate::system::gx::index::IndexGenerator;
use crate::system::gx::loader::{Inputs, VertexLoader};
use crate::system::gx::{PrimitiveClass, Topology};
use crate::system::{Config, System};

pub use crate::system::gx::loader::Touched;

/// Pending vertices and indices.
#[derive(Debug)]
pub struct Manager {
    /// Native vertex data.
    pub vertices: Vec<u8>,
    /// The loader every pending vertex was decoded with.
    pub loader: Option<Arc<VertexLoader>>,
    /// The class of every pending primitive.
    pub class: Option<PrimitiveClass>,
    pub indices: IndexGenerator,
    vertex_capacity: usize,
    index_capacity: usize,
}

impl Manager {
    pub fn new(config: &Config) -> Self {
        Self {
            vertices: Vec::new(),
            loader: None,
            class: None,
            indices: IndexGenerator::new(config.primitive_restart),
            vertex_capacity: config.vertex_buffer_size,
            index_capacity: config.index_buffer_size,
        }
    }

    /// Whether there is nothing pending.
    pub fn is_empty(&self) -> bool {
        self.indices.base == 0
    }

    /// Whether a primitive fits in the batch alongside the pending ones.
    fn fits(&self, loader: &VertexLoader, class: PrimitiveClass, bytes: usize, indices: usize) -> bool {
        let compatible = self
            .loader
            .as_ref()
            .is_none_or(|current| current.uid() == loader.uid())
            && self.class.is_none_or(|current| current == class);

        compatible
            && self.vertices.len() + bytes <= self.vertex_capacity
            && self.indices.len(class) + indices <= self.index_capacity
    }

    /// Drops everything pending without drawing it.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.loader = None;
        self.class = None;
        self.indices.reset();
    }
}

/// Decodes a primitive and appends it to the pending batch, flushing first if it does not fit.
///
/// A primitive too large for even an empty batch is decoded on its own and flushed immediately.
pub fn draw(
    sys: &mut System,
    topology: Topology,
    vat: u8,
    count: u16,
    data: &[u8],
    mem: &dyn MemoryModule,
    touched: Option<&mut Touched>,
) {
    if count == 0 {
        return;
    }

    let loader = sys.loaders.get(&sys.gpu.cmd, vat, &mut sys.stats);
    let class = topology.class();
    let manager = &sys.vertices;
    let bytes = count as usize * loader.format().stride as usize;
    let indices =
        IndexGenerator::max_indices(topology, count as u32, manager.indices.primitive_restart())
            as usize;

    let oversized = bytes > manager.vertex_capacity || indices > manager.index_capacity;
    let fits = manager.fits(&loader, class, bytes, indices)
        && manager.indices.remaining_capacity() >= count as u32;

    if !manager.is_empty() && !fits {
        self::flush(sys);
    }

    if oversized {
        tracing::debug!(
            ?topology,
            count,
            bytes,
            indices,
            "primitive exceeds the vertex manager capacity"
        );
    }

    let cmd = &sys.gpu.cmd;
    let inputs = Inputs {
        arrays: &cmd.arrays,
        scales: cmd.vertex_attr_tables[(vat & 0x7) as usize].scales(),
        mem,
    };

    let manager = &mut sys.vertices;
    loader.decode(&inputs, data, count as usize, &mut manager.vertices, touched);
    manager.indices.add(topology, count as u32);
    manager.loader = Some(loader);
    manager.class = Some(class);
    sys.stats.vertices += count as u64;

    if oversized {
        self::flush(sys);
    }
}

/// Sends the pending batch to the renderer.
pub fn flush(sys: &mut System) {
    let manager = &mut sys.vertices;
    if manager.is_empty() {
        return;
    }

    let (Some(loader), Some(class)) = (manager.loader.take(), manager.class.take()) else {
        manager.reset();
        return;
    };

    let indices = &mut manager.indices;
    let batch = Batch {
        class,
        format: *loader.format(),
        vertices: std::mem::take(&mut manager.vertices),
        triangles: std::mem::take(&mut indices.triangles),
        lines: std::mem::take(&mut indices.lines),
        points: std::mem::take(&mut indices.points),
        dirty_textures: std::mem::take(&mut sys.gpu.tex.dirty),
    };

    tracing::trace!(
        ?class,
        vertices = indices.base,
        bytes = batch.vertices.len(),
        "flushing vertices"
    );

    indices.reset();
    sys.stats.flushes += 1;
    sys.modules.render.exec(Action::Draw(Box::new(batch)));
}

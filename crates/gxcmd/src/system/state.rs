//! Save states.
//!
//! A state holds the register banks, the FIFO registers, the decode queue and the pending vertices.
//! Caches are not part of it: they are cleared on load and rebuilt lazily.
use std::io::Cursor;

use binrw::{BinRead, BinWrite, binrw};
use easyerr::{Error, ResultExt};

use crate::Address;
use crate::system::System;
use crate::system::fifo::Registers;
use crate::system::gx::PrimitiveClass;
use crate::system::gx::cmd::attributes::{
    VertexAttributeTable, VertexAttributeTableA, VertexAttributeTableB, VertexAttributeTableC,
};
use crate::system::gx::cmd::{ArrayDescriptor, VertexDescriptor};
use crate::system::gx::loader::Uid;
use crate::system::gx::xform::XF_SIZE;

/// Version of the state layout.
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Binrw { source: binrw::Error },
    #[error("unsupported state version {f0}")]
    Version(u32),
    #[error("consumer shut down before servicing the request")]
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big, magic = b"GXST")]
struct Header {
    version: u32,
}

/// Bank B.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct CpState {
    pub mat_index: [u32; 2],
    pub vcd: [u32; 2],
    pub vat: [[u32; 3]; 8],
    pub array_bases: [u32; 16],
    pub array_strides: [u32; 16],
}

/// Format of the pending vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct FormatState {
    pub vcd: u64,
    pub vat: [u32; 3],
    pub class: u8,
}

/// Vertex manager cursors and pending data.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct VertexState {
    pub base: u16,

    #[br(temp)]
    #[bw(calc = vertices.len() as u32)]
    vertices_len: u32,
    #[br(count = vertices_len)]
    pub vertices: Vec<u8>,

    #[br(temp)]
    #[bw(calc = triangles.len() as u32)]
    triangles_len: u32,
    #[br(count = triangles_len)]
    pub triangles: Vec<u16>,

    #[br(temp)]
    #[bw(calc = lines.len() as u32)]
    lines_len: u32,
    #[br(count = lines_len)]
    pub lines: Vec<u16>,

    #[br(temp)]
    #[bw(calc = points.len() as u32)]
    points_len: u32,
    #[br(count = points_len)]
    pub points: Vec<u16>,

    #[br(temp)]
    #[bw(calc = u8::from(format.is_some()))]
    has_format: u8,
    #[br(if(has_format != 0))]
    pub format: Option<FormatState>,
}

/// Everything persisted by a save state, in order.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct State {
    pub fifo: Registers,
    /// Bank A, including the pending write mask.
    pub bp: [u32; 256],
    pub cp: CpState,
    /// Bank C.
    #[br(count = XF_SIZE)]
    pub xf: Vec<u32>,

    #[br(temp)]
    #[bw(calc = queue.len() as u32)]
    queue_len: u32,
    /// Decode queue bytes not consumed yet.
    #[br(count = queue_len)]
    pub queue: Vec<u8>,

    pub vertices: VertexState,
}

fn class_to_u8(class: PrimitiveClass) -> u8 {
    match class {
        PrimitiveClass::Triangles => 0,
        PrimitiveClass::Lines => 1,
        PrimitiveClass::Points => 2,
    }
}

fn class_from_u8(value: u8) -> Option<PrimitiveClass> {
    Some(match value {
        0 => PrimitiveClass::Triangles,
        1 => PrimitiveClass::Lines,
        2 => PrimitiveClass::Points,
        _ => return None,
    })
}

impl State {
    /// Captures the state of the consumer.
    pub fn capture(sys: &System) -> Self {
        let cmd = &sys.gpu.cmd;
        let cp = CpState {
            mat_index: cmd.mat_index,
            vcd: [
                cmd.vertex_descriptor.low(),
                cmd.vertex_descriptor.high(),
            ],
            vat: std::array::from_fn(|i| {
                let table = &cmd.vertex_attr_tables[i];
                [table.a.to_bits(), table.b.to_bits(), table.c.to_bits()]
            }),
            array_bases: std::array::from_fn(|i| cmd.arrays[i].address.value()),
            array_strides: std::array::from_fn(|i| cmd.arrays[i].stride),
        };

        let manager = &sys.vertices;
        let format = manager
            .loader
            .as_ref()
            .zip(manager.class)
            .map(|(loader, class)| FormatState {
                vcd: loader.uid().vcd,
                vat: loader.uid().vat,
                class: class_to_u8(class),
            });

        let vertices = VertexState {
            base: manager.indices.base,
            vertices: manager.vertices.clone(),
            triangles: manager.indices.triangles.clone(),
            lines: manager.indices.lines.clone(),
            points: manager.indices.points.clone(),
            format,
        };

        Self {
            fifo: sys.fifo.registers(),
            bp: sys.gpu.bp,
            cp,
            xf: sys.gpu.xform.ram.to_vec(),
            queue: sys.queue.to_vec(),
            vertices,
        }
    }

    /// Overwrites the state of the consumer. No register side effects are replayed.
    pub fn apply(self, sys: &mut System) {
        sys.fifo.restore(&self.fifo);
        sys.gpu.bp = self.bp;

        let cmd = &mut sys.gpu.cmd;
        cmd.mat_index = self.cp.mat_index;
        cmd.vertex_descriptor =
            VertexDescriptor::from_bits(((self.cp.vcd[1] as u64) << 32) | self.cp.vcd[0] as u64);
        for (table, words) in cmd.vertex_attr_tables.iter_mut().zip(self.cp.vat) {
            *table = VertexAttributeTable {
                a: VertexAttributeTableA::from_bits(words[0]),
                b: VertexAttributeTableB::from_bits(words[1]),
                c: VertexAttributeTableC::from_bits(words[2]),
            };
        }

        for (i, array) in cmd.arrays.iter_mut().enumerate() {
            *array = ArrayDescriptor {
                address: Address(self.cp.array_bases[i]),
                stride: self.cp.array_strides[i],
            };
        }

        let len = sys.gpu.xform.ram.len().min(self.xf.len());
        sys.gpu.xform.ram[..len].copy_from_slice(&self.xf[..len]);

        sys.queue.clear();
        sys.queue.push_bytes(&self.queue);

        sys.loaders.clear();
        sys.dlists.clear();
        sys.gpu.tex.dirty = 0xFF;

        let manager = &mut sys.vertices;
        manager.reset();

        let state = self.vertices;
        let format = state.format.and_then(|format| {
            let uid = Uid {
                vcd: format.vcd,
                vat: format.vat,
            };

            class_from_u8(format.class).map(|class| (uid, class))
        });

        let Some((uid, class)) = format else {
            if state.base != 0 {
                tracing::warn!("state has pending vertices without a format, dropping them");
            }

            return;
        };

        let loader = sys.loaders.by_uid(uid, &mut sys.stats);
        let manager = &mut sys.vertices;
        manager.loader = Some(loader);
        manager.class = Some(class);
        manager.vertices = state.vertices;
        manager.indices.base = state.base;
        manager.indices.triangles = state.triangles;
        manager.indices.lines = state.lines;
        manager.indices.points = state.points;
    }
}

/// Serializes the state of the consumer.
pub fn save(sys: &System) -> Result<Vec<u8>, StateError> {
    let mut cursor = Cursor::new(Vec::new());
    Header { version: VERSION }
        .write(&mut cursor)
        .context(StateCtx::Binrw)?;
    State::capture(sys)
        .write(&mut cursor)
        .context(StateCtx::Binrw)?;

    tracing::debug!(bytes = cursor.get_ref().len(), "saved state");
    Ok(cursor.into_inner())
}

/// Restores the state of the consumer.
pub fn load(sys: &mut System, data: &[u8]) -> Result<(), StateError> {
    let mut cursor = Cursor::new(data);
    let header = Header::read(&mut cursor).context(StateCtx::Binrw)?;
    if header.version != VERSION {
        return Err(StateError::Version(header.version));
    }

    let state = State::read(&mut cursor).context(StateCtx::Binrw)?;
    state.apply(sys);

    tracing::debug!(bytes = data.len(), "loaded state");
    Ok(())
}

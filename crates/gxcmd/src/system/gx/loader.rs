//! Vertex loaders.
//!
//! A vertex loader decodes the raw vertices of a single vertex format into the native vertex
//! format. Loaders are built once per distinct format (see [`Uid`]) and shared by every group of
//! the vertex attribute table that uses that format.
mod decode;

#[cfg(test)]
mod test;

use std::collections::hash_map::Entry;
use std::sync::Arc;

use bitos::integer::u5;
use rustc_hash::FxHashMap;

use crate::Address;
use crate::modules::memory::MemoryModule;
use crate::system::Stats;
use crate::system::gx::cmd::attributes::{
    ColorFormat, CoordsFormat, NormalKind, PositionKind, TexCoordsDescriptor, TexCoordsKind,
    VertexAttributeTable, VertexAttributeTableA, VertexAttributeTableB, VertexAttributeTableC,
};
use crate::system::gx::cmd::{self, ArrayDescriptor, ArraySlot, VertexDescriptor};

/// Uniquely identifies the shape of a vertex loader.
///
/// Fraction bits are not part of the UID since scales are applied at decode time. Neither are the
/// attribute table fields of attributes that are not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid {
    pub vcd: u64,
    pub vat: [u32; 3],
}

impl Uid {
    pub fn new(vcd: &VertexDescriptor, vat: &VertexAttributeTable) -> Self {
        let mut a = VertexAttributeTableA::default();
        if vcd.position().is_present() {
            a.set_position(vat.a.position().with_shift(u5::new(0)));
        }

        if vcd.normal().is_present() {
            let normal = vat.a.normal();
            a.set_normal(normal);
            a.set_normal_index3(
                vat.a.normal_index3()
                    && vcd.normal().is_indexed()
                    && normal.kind() == NormalKind::N9,
            );
        }

        if vcd.chan0().is_present() {
            a.set_chan0(vat.a.chan0());
        }

        if vcd.chan1().is_present() {
            a.set_chan1(vat.a.chan1());
        }

        let mut tex = [TexCoordsDescriptor::default(); 8];
        for (i, desc) in tex.iter_mut().enumerate() {
            let present = vcd.tex_coord_at(i).is_some_and(|mode| mode.is_present());
            if let Some(vat_desc) = vat.tex(i).filter(|_| present) {
                *desc = vat_desc.with_shift(u5::new(0));
            }
        }

        let canonical = VertexAttributeTable {
            a: a.with_tex0(tex[0]),
            b: VertexAttributeTableB::default()
                .with_tex1to3([tex[1], tex[2], tex[3]])
                .with_tex4_kind(tex[4].kind())
                .with_tex4_format(tex[4].format()),
            c: VertexAttributeTableC::default().with_tex5to7([tex[5], tex[6], tex[7]]),
        };

        Self {
            vcd: vcd.to_bits(),
            vat: canonical.without_fractions(),
        }
    }

    pub fn descriptor(&self) -> VertexDescriptor {
        VertexDescriptor::from_bits(self.vcd)
    }

    pub fn table(&self) -> VertexAttributeTable {
        VertexAttributeTable {
            a: VertexAttributeTableA::from_bits(self.vat[0]),
            b: VertexAttributeTableB::from_bits(self.vat[1]),
            c: VertexAttributeTableC::from_bits(self.vat[2]),
        }
    }
}

/// Where the data of an attribute is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Direct,
    Index8(ArraySlot),
    Index16(ArraySlot),
}

impl Source {
    fn new(mode: cmd::attributes::AttributeMode, slot: ArraySlot) -> Option<Self> {
        use cmd::attributes::AttributeMode;
        Some(match mode {
            AttributeMode::None => return None,
            AttributeMode::Direct => Self::Direct,
            AttributeMode::Index8 => Self::Index8(slot),
            AttributeMode::Index16 => Self::Index16(slot),
        })
    }

    /// Size of this source in a raw vertex, given the size of the attribute when direct.
    fn size(self, direct: u32) -> u32 {
        match self {
            Self::Direct => direct,
            Self::Index8(_) => 1,
            Self::Index16(_) => 2,
        }
    }
}

/// A single decode step of a vertex loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Reads the position matrix index into scratch.
    PosMatrixIndex,
    /// Reads the matrix index of a texture coordinate into scratch.
    TexMatrixIndex(u8),
    Position {
        source: Source,
        format: CoordsFormat,
        components: u8,
    },
    Normal {
        source: Source,
        format: CoordsFormat,
        vectors: u8,
        index3: bool,
    },
    /// Decodes the color of the current channel and advances to the next one.
    Color { source: Source, format: ColorFormat },
    /// Decodes the coordinates of the current texture unit and advances to the next one.
    TexCoord {
        source: Source,
        format: CoordsFormat,
        components: u8,
        with_matrix: bool,
    },
    /// Writes `(0, 0, matrix)` for the current texture unit and advances to the next one.
    TexMatrix,
    /// Advances to the next texture unit.
    SkipTexCoord,
    /// Writes the position matrix index read by [`Step::PosMatrixIndex`].
    PosMatrixWriteBack,
}

impl Step {
    /// Size of the raw data this step consumes.
    pub fn raw_size(&self) -> u32 {
        match *self {
            Self::PosMatrixIndex | Self::TexMatrixIndex(_) => 1,
            Self::Position {
                source,
                format,
                components,
            } => source.size(components as u32 * format.size()),
            Self::Normal {
                source,
                format,
                vectors,
                index3,
            } => {
                let indices = if index3 { vectors as u32 } else { 1 };
                match source {
                    Source::Direct => 3 * vectors as u32 * format.size(),
                    _ => indices * source.size(0),
                }
            }
            Self::Color { source, format } => source.size(format.size()),
            Self::TexCoord {
                source,
                format,
                components,
                ..
            } => source.size(components as u32 * format.size()),
            Self::TexMatrix | Self::SkipTexCoord | Self::PosMatrixWriteBack => 0,
        }
    }

    /// Size of the native data this step produces.
    pub fn native_size(&self) -> u32 {
        match *self {
            Self::PosMatrixIndex | Self::TexMatrixIndex(_) | Self::SkipTexCoord => 0,
            Self::Position { components, .. } => 4 * components as u32,
            Self::Normal { vectors, .. } => 12 * vectors as u32,
            Self::Color { .. } => 4,
            Self::TexCoord {
                components,
                with_matrix,
                ..
            } => {
                if with_matrix {
                    12
                } else {
                    4 * components as u32
                }
            }
            Self::TexMatrix => 12,
            Self::PosMatrixWriteBack => 4,
        }
    }
}

/// Location of an attribute in a native vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeAttribute {
    /// Offset in bytes from the start of the vertex.
    pub offset: u32,
    /// Number of components.
    pub components: u8,
}

/// Layout of a native vertex.
///
/// Positions, normals and texture coordinates are `f32` components. Colors are four `u8`
/// components in RGBA order. The position matrix index is a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeFormat {
    pub stride: u32,
    pub position: Option<NativeAttribute>,
    /// Normal, followed by tangent and binormal if present.
    pub normals: Option<NativeAttribute>,
    pub colors: [Option<NativeAttribute>; 2],
    pub tex_coords: [Option<NativeAttribute>; 8],
    pub pos_matrix: Option<u32>,
}

/// Windows of the external arrays read while decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Touched {
    windows: [Option<(Address, Address)>; 12],
}

impl Touched {
    #[inline(always)]
    pub fn record(&mut self, slot: ArraySlot, addr: Address, len: u32) {
        let end = addr + len;
        let window = &mut self.windows[slot as usize];
        *window = Some(match *window {
            Some((start, stop)) => (start.min(addr), stop.max(end)),
            None => (addr, end),
        });
    }

    /// Iterates over the touched windows as `(start, length)` pairs.
    pub fn windows(&self) -> impl Iterator<Item = (Address, u32)> + '_ {
        self.windows
            .iter()
            .flatten()
            .map(|&(start, end)| (start, end - start))
    }

    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(Option::is_none)
    }
}

/// Runtime inputs of a vertex loader.
pub struct Inputs<'a> {
    pub arrays: &'a [ArrayDescriptor; 16],
    /// Position scale followed by the scales of the eight texture coordinates.
    pub scales: [f32; 9],
    pub mem: &'a dyn MemoryModule,
}

/// A vertex decoder specialised to a single vertex format.
#[derive(Debug)]
pub struct VertexLoader {
    uid: Uid,
    steps: Vec<Step>,
    vertex_size: u32,
    format: NativeFormat,
}

impl VertexLoader {
    pub fn new(uid: Uid) -> Self {
        let vcd = uid.descriptor();
        let vat = uid.table();

        let mut steps = Vec::new();
        let mut format = NativeFormat::default();
        let mut vertex_size = 0;
        let mut offset = 0;

        let mut push = |step: Step| {
            vertex_size += step.raw_size();
            let start = offset;
            offset += step.native_size();
            steps.push(step);
            start
        };

        if vcd.pos_mat_index() {
            push(Step::PosMatrixIndex);
        }

        let tex_matrices = vcd.tex_coord_mat_index();
        for (i, &present) in tex_matrices.iter().enumerate() {
            if present {
                push(Step::TexMatrixIndex(i as u8));
            }
        }

        let position = vat.a.position();
        if let Some(source) = Source::new(vcd.position(), ArraySlot::Position) {
            let components = match position.kind() {
                PositionKind::Vec2 => 2,
                PositionKind::Vec3 => 3,
            };

            let at = push(Step::Position {
                source,
                format: position.format().effective(),
                components,
            });

            format.position = Some(NativeAttribute {
                offset: at,
                components,
            });
        }

        let normal = vat.a.normal();
        if let Some(source) = Source::new(vcd.normal(), ArraySlot::Normal) {
            let vectors = normal.vectors() as u8;
            let at = push(Step::Normal {
                source,
                format: normal.format().effective(),
                vectors,
                index3: vat.a.normal_index3(),
            });

            format.normals = Some(NativeAttribute {
                offset: at,
                components: 3 * vectors,
            });
        }

        for (i, (mode, desc)) in [
            (vcd.chan0(), vat.a.chan0()),
            (vcd.chan1(), vat.a.chan1()),
        ]
        .into_iter()
        .enumerate()
        {
            let slot = if i == 0 {
                ArraySlot::Chan0
            } else {
                ArraySlot::Chan1
            };

            if let Some(source) = Source::new(mode, slot) {
                let at = push(Step::Color {
                    source,
                    format: desc.format().effective(),
                });

                format.colors[i] = Some(NativeAttribute {
                    offset: at,
                    components: 4,
                });
            }
        }

        let last_tex = (0..8).rev().find(|&i| {
            tex_matrices[i] || vcd.tex_coord_at(i).is_some_and(|mode| mode.is_present())
        });

        for i in 0..last_tex.map_or(0, |last| last + 1) {
            let mode = vcd.tex_coord_at(i).unwrap_or_default();
            let desc = vat.tex(i).unwrap_or_default();
            let with_matrix = tex_matrices[i];

            let step = match Source::new(mode, ArraySlot::tex(i)) {
                Some(source) => Step::TexCoord {
                    source,
                    format: desc.format().effective(),
                    components: match desc.kind() {
                        TexCoordsKind::Vec1 => 1,
                        TexCoordsKind::Vec2 => 2,
                    },
                    with_matrix,
                },
                None if with_matrix => Step::TexMatrix,
                None => {
                    push(Step::SkipTexCoord);
                    continue;
                }
            };

            let native = step.native_size();
            let at = push(step);
            format.tex_coords[i] = Some(NativeAttribute {
                offset: at,
                components: (native / 4) as u8,
            });
        }

        if vcd.pos_mat_index() {
            format.pos_matrix = Some(push(Step::PosMatrixWriteBack));
        }

        format.stride = offset;

        let reserved_coords = [position.format(), normal.format()]
            .into_iter()
            .chain((0..8).filter_map(|i| vat.tex(i).map(|t| t.format())))
            .any(CoordsFormat::is_reserved);
        let reserved_colors = [vat.a.chan0().format(), vat.a.chan1().format()]
            .into_iter()
            .any(ColorFormat::is_reserved);

        if reserved_coords || reserved_colors {
            tracing::warn!(?uid, "vertex format uses reserved formats, decoding as f32/rgba8888");
        }

        Self {
            uid,
            steps,
            vertex_size,
            format,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Size of a raw vertex in bytes.
    pub fn vertex_size(&self) -> u32 {
        self.vertex_size
    }

    pub fn format(&self) -> &NativeFormat {
        &self.format
    }

    /// Decodes `count` raw vertices from `data`, appending native vertices to `out`.
    ///
    /// Returns how many bytes of `data` were consumed, which is always `count * vertex_size`.
    pub fn decode(
        &self,
        inputs: &Inputs<'_>,
        data: &[u8],
        count: usize,
        out: &mut Vec<u8>,
        mut touched: Option<&mut Touched>,
    ) -> usize {
        let size = self.vertex_size as usize;
        let total = count * size;
        debug_assert!(data.len() >= total);

        out.reserve(count * self.format.stride as usize);
        for i in 0..count {
            let record = &data[i * size..(i + 1) * size];
            let mut scratch = decode::Scratch::default();
            let mut cursor = 0;
            for step in &self.steps {
                cursor += decode::step(
                    step,
                    inputs,
                    &record[cursor..],
                    &mut scratch,
                    out,
                    touched.as_deref_mut(),
                );
            }

            debug_assert_eq!(cursor, size);
        }

        total
    }
}

/// The cache of vertex loaders and the loaders bound to each vertex attribute table group.
#[derive(Debug)]
pub struct Cache {
    loaders: FxHashMap<Uid, Arc<VertexLoader>>,
    bound: [Option<Arc<VertexLoader>>; 8],
    /// Groups whose binding must be revalidated, one bit per group.
    dirty: u8,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            loaders: FxHashMap::default(),
            bound: Default::default(),
            dirty: 0xFF,
        }
    }
}

impl Cache {
    /// Returns the loader for the given vertex attribute table group, building it if needed.
    pub fn get(&mut self, cmd: &cmd::Interface, vat: u8, stats: &mut Stats) -> Arc<VertexLoader> {
        let index = (vat & 0x7) as usize;
        if self.dirty & (1 << index) == 0
            && let Some(bound) = &self.bound[index]
        {
            return bound.clone();
        }

        let uid = Uid::new(&cmd.vertex_descriptor, &cmd.vertex_attr_tables[index]);
        let loader = self.by_uid(uid, stats);
        self.bound[index] = Some(loader.clone());
        self.dirty &= !(1 << index);
        loader
    }

    /// Returns the loader for `uid`, building it if needed.
    pub fn by_uid(&mut self, uid: Uid, stats: &mut Stats) -> Arc<VertexLoader> {
        match self.loaders.entry(uid) {
            Entry::Occupied(o) => o.get().clone(),
            Entry::Vacant(v) => {
                let loader = Arc::new(VertexLoader::new(uid));
                tracing::debug!(
                    ?uid,
                    steps = loader.steps.len(),
                    vertex_size = loader.vertex_size,
                    stride = loader.format.stride,
                    "built vertex loader"
                );

                stats.loaders_built += 1;
                v.insert(loader).clone()
            }
        }
    }

    pub fn mark_dirty(&mut self, vat: u8) {
        self.dirty |= 1 << (vat & 0x7);
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty = 0xFF;
    }

    pub fn dirty(&self) -> u8 {
        self.dirty
    }

    /// Number of distinct loaders built so far.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Drops every loader and binding.
    pub fn clear(&mut self) {
        self.loaders.clear();
        self.bound = Default::default();
        self.dirty = 0xFF;
    }
}

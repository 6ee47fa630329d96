//! Transform unit (XF).
use std::ops::Range;

use bitos::integer::{u3, u6};
use bitos::{BitUtils, bitos};
use strum::FromRepr;

use crate::Address;
use crate::modules::shader::Change;
use crate::system::System;
use crate::system::gx::DEPTH_24_BIT_MAX;
use crate::system::gx::cmd::ArraySlot;
use crate::system::gx::vertex;

/// Address of the first transform unit register.
pub const REGISTERS_BASE: u16 = 0x1000;
/// Size of the transform unit address space, in words.
pub const XF_SIZE: usize = 0x1058;

/// A transform unit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Reg {
    Error                  = 0x00,
    Diagnostics            = 0x01,
    State0                 = 0x02,
    State1                 = 0x03,
    PowerSave              = 0x04,
    ClipDisable            = 0x05,
    Perf0                  = 0x06,
    Perf1                  = 0x07,
    InVertexSpec           = 0x08,
    NumColors              = 0x09,
    Ambient0               = 0x0A,
    Ambient1               = 0x0B,
    Material0              = 0x0C,
    Material1              = 0x0D,
    ColorControl0          = 0x0E,
    ColorControl1          = 0x0F,
    AlphaControl0          = 0x10,
    AlphaControl1          = 0x11,
    DualTextureTransform   = 0x12,
    MatIndexLow            = 0x18,
    MatIndexHigh           = 0x19,
    ViewportScaleX         = 0x1A,
    ViewportScaleY         = 0x1B,
    ViewportScaleZ         = 0x1C,
    ViewportOffsetX        = 0x1D,
    ViewportOffsetY        = 0x1E,
    ViewportOffsetZ        = 0x1F,
    ProjectionParam0       = 0x20,
    ProjectionParam1       = 0x21,
    ProjectionParam2       = 0x22,
    ProjectionParam3       = 0x23,
    ProjectionParam4       = 0x24,
    ProjectionParam5       = 0x25,
    ProjectionOrthographic = 0x26,
    TexGenCount            = 0x3F,
    TexGen0                = 0x40,
    TexGen1                = 0x41,
    TexGen2                = 0x42,
    TexGen3                = 0x43,
    TexGen4                = 0x44,
    TexGen5                = 0x45,
    TexGen6                = 0x46,
    TexGen7                = 0x47,
    PostTexGen0            = 0x50,
    PostTexGen1            = 0x51,
    PostTexGen2            = 0x52,
    PostTexGen3            = 0x53,
    PostTexGen4            = 0x54,
    PostTexGen5            = 0x55,
    PostTexGen6            = 0x56,
    PostTexGen7            = 0x57,
}

impl Reg {
    pub fn address(self) -> u16 {
        REGISTERS_BASE + self as u16
    }

    pub fn is_viewport(&self) -> bool {
        matches!(
            self,
            Reg::ViewportScaleX
                | Reg::ViewportScaleY
                | Reg::ViewportScaleZ
                | Reg::ViewportOffsetX
                | Reg::ViewportOffsetY
                | Reg::ViewportOffsetZ
        )
    }

    pub fn is_projection_param(&self) -> bool {
        matches!(
            self,
            Reg::ProjectionParam0
                | Reg::ProjectionParam1
                | Reg::ProjectionParam2
                | Reg::ProjectionParam3
                | Reg::ProjectionParam4
                | Reg::ProjectionParam5
                | Reg::ProjectionOrthographic
        )
    }

    pub fn is_texgen(&self) -> bool {
        matches!(
            self,
            Reg::DualTextureTransform
                | Reg::TexGenCount
                | Reg::TexGen0
                | Reg::TexGen1
                | Reg::TexGen2
                | Reg::TexGen3
                | Reg::TexGen4
                | Reg::TexGen5
                | Reg::TexGen6
                | Reg::TexGen7
                | Reg::PostTexGen0
                | Reg::PostTexGen1
                | Reg::PostTexGen2
                | Reg::PostTexGen3
                | Reg::PostTexGen4
                | Reg::PostTexGen5
                | Reg::PostTexGen6
                | Reg::PostTexGen7
        )
    }

    pub fn is_lighting(&self) -> bool {
        matches!(
            self,
            Reg::NumColors
                | Reg::ColorControl0
                | Reg::ColorControl1
                | Reg::AlphaControl0
                | Reg::AlphaControl1
        )
    }

    /// Whether writes to this register only affect diagnostics and never rendering.
    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            Reg::Error
                | Reg::Diagnostics
                | Reg::State0
                | Reg::State1
                | Reg::PowerSave
                | Reg::ClipDisable
                | Reg::Perf0
                | Reg::Perf1
        )
    }
}

/// A region of transform unit memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Matrices,
    NormalMatrices,
    PostMatrices,
    Lights,
}

impl Region {
    pub fn of(addr: u16) -> Option<Self> {
        Some(match addr {
            0x0000..0x0400 => Self::Matrices,
            0x0400..0x0460 => Self::NormalMatrices,
            0x0500..0x0600 => Self::PostMatrices,
            0x0600..0x0680 => Self::Lights,
            _ => return None,
        })
    }

    pub fn range(self) -> Range<u16> {
        match self {
            Self::Matrices => 0x0000..0x0400,
            Self::NormalMatrices => 0x0400..0x0460,
            Self::PostMatrices => 0x0500..0x0600,
            Self::Lights => 0x0600..0x0680,
        }
    }

    fn change(self, range: Range<u16>) -> Change {
        match self {
            Self::Matrices => Change::Matrices(range),
            Self::NormalMatrices => Change::NormalMatrices(range),
            Self::PostMatrices => Change::PostMatrices(range),
            Self::Lights => Change::Lights(range),
        }
    }

    /// Bits of a word in this region that are actually stored.
    fn mask(self) -> u32 {
        match self {
            Self::NormalMatrices => !0xFFF,
            _ => !0,
        }
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, Default)]
pub enum TexGenOutputKind {
    #[default]
    Vec2 = 0,
    Vec3 = 1,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, Default)]
pub enum TexGenInputKind {
    #[default]
    AB11 = 0,
    ABC1 = 1,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, Default)]
pub enum TexGenKind {
    #[default]
    Transform     = 0b00,
    Emboss        = 0b01,
    ColorDiffuse  = 0b10,
    ColorSpecular = 0b11,
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, Default)]
pub enum TexGenSource {
    #[default]
    Position  = 0x0,
    Normal    = 0x1,
    Color     = 0x2,
    BinormalT = 0x3,
    BinormalB = 0x4,
    TexCoord0 = 0x5,
    TexCoord1 = 0x6,
    TexCoord2 = 0x7,
    TexCoord3 = 0x8,
    TexCoord4 = 0x9,
    TexCoord5 = 0xA,
    TexCoord6 = 0xB,
    TexCoord7 = 0xC,
    Reserved0 = 0xD,
    Reserved1 = 0xE,
    Reserved2 = 0xF,
}

#[bitos(32)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BaseTexGen {
    #[bits(1)]
    pub output_kind: TexGenOutputKind,
    #[bits(2)]
    pub input_kind: TexGenInputKind,
    #[bits(4..6)]
    pub kind: TexGenKind,
    #[bits(7..11)]
    pub source: TexGenSource,
    #[bits(12..15)]
    pub emboss_source: u3,
    #[bits(15..18)]
    pub emboss_light: u3,
}

#[bitos(32)]
#[derive(Debug, Clone, Default)]
pub struct PostTexGen {
    #[bits(0..6)]
    pub mat_index: u6,
    #[bits(8)]
    pub normalize: bool,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffuseAttenuation {
    One            = 0b00,
    Compute        = 0b01,
    ComputeClamped = 0b10,
    Reserved0      = 0b11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Channel {
    #[bits(0)]
    pub material_from_vertex: bool,
    #[bits(1)]
    pub lighting_enabled: bool,
    #[bits(2..6)]
    pub lights0to3: [bool; 4],
    #[bits(6)]
    pub ambient_from_vertex: bool,
    #[bits(7..9)]
    pub diffuse_atten: DiffuseAttenuation,
    #[bits(9)]
    pub position_atten: bool,
    #[bits(10)]
    pub not_specular: bool,
    #[bits(11..15)]
    pub lights4to7: [bool; 4],
}

/// The matrices used by vertices that don't carry their own matrix indices.
#[bitos(64)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixIndices {
    #[bits(0..6)]
    pub view: u6,
    #[bits(6..54)]
    pub tex: [u6; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub far: f32,
    pub far_minus_near: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectionParams {
    pub params: [f32; 6],
    pub orthographic: bool,
}

/// Transform unit
pub struct Interface {
    /// The whole address space: memory followed by registers.
    pub ram: Box<[u32]>,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            ram: vec![0; XF_SIZE].into_boxed_slice(),
        }
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("registers", &&self.ram[REGISTERS_BASE as usize..])
            .finish_non_exhaustive()
    }
}

impl Interface {
    #[inline(always)]
    pub fn reg(&self, reg: Reg) -> u32 {
        self.ram[reg.address() as usize]
    }

    fn reg_f32(&self, reg: Reg) -> f32 {
        f32::from_bits(self.reg(reg))
    }

    pub fn matrix_indices(&self) -> MatrixIndices {
        MatrixIndices::from_bits(
            0u64.with_bits(0, 32, self.reg(Reg::MatIndexLow) as u64)
                .with_bits(32, 64, self.reg(Reg::MatIndexHigh) as u64),
        )
    }

    pub fn color_control(&self, index: usize) -> Channel {
        let reg = if index == 0 { Reg::ColorControl0 } else { Reg::ColorControl1 };
        Channel::from_bits(self.reg(reg))
    }

    pub fn alpha_control(&self, index: usize) -> Channel {
        let reg = if index == 0 { Reg::AlphaControl0 } else { Reg::AlphaControl1 };
        Channel::from_bits(self.reg(reg))
    }

    pub fn texgen(&self, index: usize) -> BaseTexGen {
        BaseTexGen::from_bits(self.ram[Reg::TexGen0.address() as usize + (index & 7)])
    }

    pub fn post_texgen(&self, index: usize) -> PostTexGen {
        PostTexGen::from_bits(self.ram[Reg::PostTexGen0.address() as usize + (index & 7)])
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.reg_f32(Reg::ViewportScaleX) * 2.0,
            height: self.reg_f32(Reg::ViewportScaleY) * -2.0,
            center_x: self.reg_f32(Reg::ViewportOffsetX) - 342.0,
            center_y: self.reg_f32(Reg::ViewportOffsetY) - 342.0,
            far: self.reg_f32(Reg::ViewportOffsetZ) / DEPTH_24_BIT_MAX as f32,
            far_minus_near: self.reg_f32(Reg::ViewportScaleZ) / DEPTH_24_BIT_MAX as f32,
        }
    }

    pub fn projection(&self) -> ProjectionParams {
        let mut params = [0.0; 6];
        for (i, param) in params.iter_mut().enumerate() {
            *param = f32::from_bits(self.ram[Reg::ProjectionParam0.address() as usize + i]);
        }

        ProjectionParams {
            params,
            orthographic: self.reg(Reg::ProjectionOrthographic) != 0,
        }
    }
}

/// Sets the value of an internal transform unit register.
pub fn set_register(sys: &mut System, reg: Reg, value: u32) {
    let addr = reg.address() as usize;
    if sys.gpu.xform.ram[addr] == value {
        return;
    }

    tracing::trace!("wrote {value:08X} to internal XF register {reg:?}");
    if reg.is_passive() {
        sys.gpu.xform.ram[addr] = value;
        return;
    }

    vertex::flush(sys);
    sys.gpu.xform.ram[addr] = value;

    let change = match reg {
        Reg::InVertexSpec => {
            sys.loaders.mark_all_dirty();
            Change::VertexSpec
        }
        Reg::Ambient0 => Change::AmbientColor(0),
        Reg::Ambient1 => Change::AmbientColor(1),
        Reg::Material0 => Change::MaterialColor(0),
        Reg::Material1 => Change::MaterialColor(1),
        Reg::MatIndexLow | Reg::MatIndexHigh => Change::MatrixIndices,
        _ if reg.is_lighting() => Change::Lighting,
        _ if reg.is_texgen() => Change::TexGen,
        _ if reg.is_viewport() => Change::Viewport,
        _ if reg.is_projection_param() => Change::Projection,
        _ => return,
    };

    sys.modules.shader.notify(change);
}

/// Stores a run of words inside a single region. Only the bits the region keeps are compared, so a
/// write that leaves every masked word unchanged neither flushes nor notifies.
fn write_memory(sys: &mut System, region: Region, start: u16, values: &[u32]) {
    let mask = region.mask();
    let range = start as usize..start as usize + values.len();
    let changed = sys.gpu.xform.ram[range.clone()]
        .iter()
        .zip(values)
        .any(|(old, new)| *old != new & mask);

    if !changed {
        return;
    }

    vertex::flush(sys);
    for (dst, src) in sys.gpu.xform.ram[range].iter_mut().zip(values) {
        *dst = src & mask;
    }

    let end = start + values.len() as u16;
    sys.modules.shader.notify(region.change(start..end));
}

/// Writes a block of consecutive words to transform unit memory.
pub fn write_block(sys: &mut System, start: u16, values: &[u32]) {
    let mut addr = start as u32;
    let mut rest = values;
    while let Some(&value) = rest.first() {
        if let Some(region) = u16::try_from(addr).ok().and_then(Region::of) {
            let end = (region.range().end as u32).min(addr + rest.len() as u32);
            let len = (end - addr) as usize;
            self::write_memory(sys, region, addr as u16, &rest[..len]);

            rest = &rest[len..];
            addr = end;
            continue;
        }

        match addr
            .checked_sub(REGISTERS_BASE as u32)
            .and_then(|r| u8::try_from(r).ok())
            .and_then(Reg::from_repr)
        {
            Some(reg) => self::set_register(sys, reg, value),
            None => tracing::warn!("write to unknown XF address 0x{addr:04X}: 0x{value:08X}"),
        }

        rest = &rest[1..];
        addr += 1;
    }
}

/// Reads the words of an indexed transform unit load from a general purpose array, returning
/// their address and values.
pub fn read_indexed(sys: &System, array: u8, index: u16, length: u8) -> (Address, Vec<u32>) {
    let array = sys.gpu.cmd.array(ArraySlot::general_purpose(array));
    let addr = array.address + index as u32 * array.stride;

    let mut bytes = vec![0; 4 * length as usize];
    if !sys.modules.mem.read(addr, &mut bytes) {
        tracing::warn!("indexed XF load from unmapped address {addr}");
        bytes.fill(0);
    }

    let values = bytes
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    (addr, values)
}

//! Vertex attribute formats.
use bitos::bitos;
use bitos::integer::u5;

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PositionKind {
    /// Two components (x, y).
    #[default]
    Vec2 = 0b0,
    /// Three components (x, y, z).
    Vec3 = 0b1,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordsFormat {
    #[default]
    U8        = 0b000,
    I8        = 0b001,
    U16       = 0b010,
    I16       = 0b011,
    F32       = 0b100,
    Reserved0 = 0b101,
    Reserved1 = 0b110,
    Reserved2 = 0b111,
}

impl CoordsFormat {
    /// The format values are actually decoded as. Reserved formats decode as [`Self::F32`].
    pub fn effective(self) -> Self {
        match self {
            Self::Reserved0 | Self::Reserved1 | Self::Reserved2 => Self::F32,
            _ => self,
        }
    }

    pub fn is_reserved(self) -> bool {
        self.effective() != self
    }

    /// Size of a single component in bytes.
    pub fn size(self) -> u32 {
        match self.effective() {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            _ => 4,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16)
    }
}

#[bitos(9)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionDescriptor {
    #[bits(0)]
    pub kind: PositionKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
    #[bits(4..9)]
    pub shift: u5,
}

impl PositionDescriptor {
    pub fn components(&self) -> u32 {
        match self.kind() {
            PositionKind::Vec2 => 2,
            PositionKind::Vec3 => 3,
        }
    }

    /// Size of a direct position in an attribute stream.
    pub fn size(&self) -> u32 {
        self.components() * self.format().size()
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NormalKind {
    /// A normal.
    #[default]
    N3 = 0b0,
    /// A normal, a binormal and a tangent.
    N9 = 0b1,
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NormalDescriptor {
    #[bits(0)]
    pub kind: NormalKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
}

impl NormalDescriptor {
    pub fn vectors(&self) -> u32 {
        match self.kind() {
            NormalKind::N3 => 1,
            NormalKind::N9 => 3,
        }
    }

    /// Size of a direct normal in an attribute stream.
    pub fn size(&self) -> u32 {
        3 * self.vectors() * self.format().size()
    }

    /// The fixed scale of normal components: `2^-(bits - signed - 1)`.
    pub fn scale(&self) -> f32 {
        let format = self.format().effective();
        if format == CoordsFormat::F32 {
            return 1.0;
        }

        let bits = 8 * format.size() as i32;
        let signed = format.is_signed() as i32;
        2.0f32.powi(-(bits - signed - 1))
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorKind {
    /// Three components (r, g, b).
    #[default]
    Rgb  = 0b0,
    /// Four components (r, g, b, a).
    Rgba = 0b1,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    #[default]
    Rgb565    = 0b000,
    Rgb888    = 0b001,
    Rgb888x   = 0b010,
    Rgba4444  = 0b011,
    Rgba6666  = 0b100,
    Rgba8888  = 0b101,
    Reserved0 = 0b110,
    Reserved1 = 0b111,
}

impl ColorFormat {
    /// The format values are actually decoded as. Reserved formats decode as
    /// [`Self::Rgba8888`].
    pub fn effective(self) -> Self {
        match self {
            Self::Reserved0 | Self::Reserved1 => Self::Rgba8888,
            _ => self,
        }
    }

    pub fn is_reserved(self) -> bool {
        self.effective() != self
    }

    pub fn size(self) -> u32 {
        match self.effective() {
            Self::Rgb565 | Self::Rgba4444 => 2,
            Self::Rgb888 | Self::Rgba6666 => 3,
            _ => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self.effective(),
            Self::Rgba4444 | Self::Rgba6666 | Self::Rgba8888
        )
    }
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorDescriptor {
    #[bits(0)]
    pub kind: ColorKind,
    #[bits(1..4)]
    pub format: ColorFormat,
}

impl ColorDescriptor {
    pub fn size(&self) -> u32 {
        self.format().size()
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TexCoordsKind {
    /// One component (s).
    #[default]
    Vec1 = 0b0,
    /// Two components (s, t).
    Vec2 = 0b1,
}

#[bitos(9)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TexCoordsDescriptor {
    #[bits(0)]
    pub kind: TexCoordsKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
    #[bits(4..9)]
    pub shift: u5,
}

impl TexCoordsDescriptor {
    pub fn components(&self) -> u32 {
        match self.kind() {
            TexCoordsKind::Vec1 => 1,
            TexCoordsKind::Vec2 => 2,
        }
    }

    /// Size of direct coordinates in an attribute stream.
    pub fn size(&self) -> u32 {
        self.components() * self.format().size()
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableA {
    #[bits(0..9)]
    pub position: PositionDescriptor,
    #[bits(9..13)]
    pub normal: NormalDescriptor,
    #[bits(13..17)]
    pub chan0: ColorDescriptor,
    #[bits(17..21)]
    pub chan1: ColorDescriptor,
    #[bits(21..30)]
    pub tex0: TexCoordsDescriptor,
    #[bits(30)]
    pub byte_dequant: bool,
    /// Whether indexed NBT normals use one index per vector.
    #[bits(31)]
    pub normal_index3: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableB {
    #[bits(0..27)]
    pub tex1to3: [TexCoordsDescriptor; 3],

    #[bits(27)]
    pub tex4_kind: TexCoordsKind,
    #[bits(28..31)]
    pub tex4_format: CoordsFormat,

    #[bits(31)]
    pub vcache_enhance: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableC {
    #[bits(0..5)]
    pub tex4_shift: u5,
    #[bits(5..32)]
    pub tex5to7: [TexCoordsDescriptor; 3],
}

/// Fraction bits of the position and texture coordinate 0.
const FRAC_MASK_A: u32 = 0x3E00_01F0;
/// Fraction bits of texture coordinates 1 to 3.
const FRAC_MASK_B: u32 = 0x07C3_E1F0;
/// Fraction bits of texture coordinates 4 to 7.
const FRAC_MASK_C: u32 = 0xF87C_3E1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTable {
    pub a: VertexAttributeTableA,
    pub b: VertexAttributeTableB,
    pub c: VertexAttributeTableC,
}

impl VertexAttributeTable {
    pub fn tex(&self, index: usize) -> Option<TexCoordsDescriptor> {
        Some(match index {
            0 => self.a.tex0(),
            1..4 => self.b.tex1to3_at(index - 1)?,
            4 => TexCoordsDescriptor::default()
                .with_kind(self.b.tex4_kind())
                .with_format(self.b.tex4_format())
                .with_shift(self.c.tex4_shift()),
            5..8 => self.c.tex5to7_at(index - 5)?,
            _ => return None,
        })
    }

    /// Returns the raw words of this table with every fraction field cleared.
    pub fn without_fractions(&self) -> [u32; 3] {
        [
            self.a.to_bits() & !FRAC_MASK_A,
            self.b.to_bits() & !FRAC_MASK_B,
            self.c.to_bits() & !FRAC_MASK_C,
        ]
    }

    /// Returns the scale of the position followed by the scales of the eight texture
    /// coordinates, `2^-shift` for each.
    pub fn scales(&self) -> [f32; 9] {
        let mut scales = [1.0; 9];
        scales[0] = SCALE_TABLE[self.a.position().shift().value() as usize];
        for (i, scale) in scales[1..].iter_mut().enumerate() {
            if let Some(tex) = self.tex(i) {
                *scale = SCALE_TABLE[tex.shift().value() as usize];
            }
        }

        scales
    }
}

/// Reciprocal powers of two, indexed by fraction bit count.
pub static SCALE_TABLE: [f32; 32] = {
    let mut table = [0.0; 32];
    let mut i = 0;
    while i < 32 {
        table[i] = 1.0 / (1u64 << i) as f32;
        i += 1;
    }

    table
};

/// The mode of an attribute. The mode defines whether the attribute is present directly in the
/// stream or indirectly through an index into an array.
#[bitos[2]]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeMode {
    /// Not present
    #[default]
    None    = 0b00,
    /// Directly in the vertex attribute stream
    Direct  = 0b01,
    /// Indirectly through a 8 bit index in the vertex attribute stream
    Index8  = 0b10,
    /// Indirectly through a 16 bit index in the vertex attribute stream
    Index16 = 0b11,
}

impl AttributeMode {
    pub fn is_present(self) -> bool {
        self != AttributeMode::None
    }

    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Index8 | Self::Index16)
    }

    /// Size of an index of this mode in a stream, if the attribute is indexed or absent.
    pub fn index_size(self) -> Option<u32> {
        match self {
            Self::None => Some(0),
            Self::Direct => None,
            Self::Index8 => Some(1),
            Self::Index16 => Some(2),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fraction_masks_cover_shift_fields() {
        let a = VertexAttributeTableA::default()
            .with_position(PositionDescriptor::default().with_shift(u5::new(31)))
            .with_tex0(TexCoordsDescriptor::default().with_shift(u5::new(31)));
        assert_eq!(a.to_bits(), FRAC_MASK_A);

        let tex = TexCoordsDescriptor::default().with_shift(u5::new(31));
        let b = VertexAttributeTableB::default().with_tex1to3([tex; 3]);
        assert_eq!(b.to_bits(), FRAC_MASK_B);

        let c = VertexAttributeTableC::default()
            .with_tex4_shift(u5::new(31))
            .with_tex5to7([tex; 3]);
        assert_eq!(c.to_bits(), FRAC_MASK_C);
    }

    #[test]
    fn normal_scales() {
        let normal = |format| NormalDescriptor::default().with_format(format).scale();
        assert_eq!(normal(CoordsFormat::U8), 1.0 / 128.0);
        assert_eq!(normal(CoordsFormat::I8), 1.0 / 64.0);
        assert_eq!(normal(CoordsFormat::U16), 1.0 / 32768.0);
        assert_eq!(normal(CoordsFormat::I16), 1.0 / 16384.0);
        assert_eq!(normal(CoordsFormat::F32), 1.0);
    }

    #[test]
    fn reserved_formats_fall_back() {
        assert_eq!(CoordsFormat::Reserved1.size(), 4);
        assert_eq!(ColorFormat::Reserved0.size(), 4);
        assert!(ColorFormat::Reserved1.has_alpha());
    }
}

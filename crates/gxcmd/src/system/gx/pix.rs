//! Pixel engine (PE) register views.
use bitos::integer::{u2, u3, u4, u10, u11};
use bitos::{BitUtils, bitos};

use crate::Address;
use crate::system::gx::Reg;

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferFormat {
    #[default]
    RGB8Z24   = 0x0,
    RGBA6Z24  = 0x1,
    RGB565Z16 = 0x2,
    Z24       = 0x3,
    Y8        = 0x4,
    U8        = 0x5,
    V8        = 0x6,
    YUV420    = 0x7,
}

impl BufferFormat {
    pub fn has_alpha(self) -> bool {
        self == Self::RGBA6Z24
    }

    pub fn is_depth(self) -> bool {
        self == Self::Z24
    }
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthCompression {
    #[default]
    Linear = 0b00,
    Near   = 0b01,
    Mid    = 0b10,
    Far    = 0b11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Control {
    #[bits(0..3)]
    pub format: BufferFormat,
    #[bits(3..5)]
    pub depth_compression: DepthCompression,
    #[bits(6)]
    pub depth_compress_before_tex: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstantAlpha {
    #[bits(0..8)]
    pub value: u8,
    #[bits(8)]
    pub enabled: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopySrc {
    #[bits(0..10)]
    pub x: u10,
    #[bits(10..20)]
    pub y: u10,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyDims {
    #[bits(0..10)]
    pub width_minus_one: u10,
    #[bits(10..20)]
    pub height_minus_one: u10,
}

impl CopyDims {
    pub fn width(&self) -> u16 {
        self.width_minus_one().value() + 1
    }

    pub fn height(&self) -> u16 {
        self.height_minus_one().value() + 1
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyCmd {
    #[bits(0..2)]
    pub clamp: u2,
    #[bits(3)]
    pub format_bit_3: bool,
    #[bits(4..7)]
    pub format_bits_0to2: u3,
    #[bits(7..9)]
    pub gamma: u2,
    #[bits(9)]
    pub half: bool,
    #[bits(11)]
    pub clear: bool,
    /// to XFB or to texture?
    #[bits(14)]
    pub to_xfb: bool,
}

impl CopyCmd {
    /// The raw copy format, shared between color and depth copies.
    pub fn format(&self) -> u4 {
        u4::new((self.format_bit_3() as u8) << 3 | self.format_bits_0to2().value())
    }
}

/// PE interrupt status, as seen by the CPU.
#[bitos(16)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptStatus {
    #[bits(0)]
    pub token_enabled: bool,
    #[bits(1)]
    pub finish_enabled: bool,
    #[bits(2)]
    pub token: bool,
    #[bits(3)]
    pub finish: bool,
}

impl InterruptStatus {
    /// Applies a CPU write: bits 0 and 1 are enables, writing 1 to bits 2 or 3 acknowledges.
    pub fn write(&mut self, status: u16) {
        self.set_token_enabled(status.bit(0));
        self.set_finish_enabled(status.bit(1));
        self.set_token(self.token() & !status.bit(2));
        self.set_finish(self.finish() & !status.bit(3));
    }

    pub fn token_raised(&self) -> bool {
        self.token() && self.token_enabled()
    }

    pub fn finish_raised(&self) -> bool {
        self.finish() && self.finish_enabled()
    }
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    #[default]
    Never          = 0x0,
    Less           = 0x1,
    Equal          = 0x2,
    LessOrEqual    = 0x3,
    Greater        = 0x4,
    NotEqual       = 0x5,
    GreaterOrEqual = 0x6,
    Always         = 0x7,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthMode {
    #[bits(0)]
    pub enable: bool,
    #[bits(1..4)]
    pub compare: CompareMode,
    #[bits(4)]
    pub update: bool,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrcBlendFactor {
    #[default]
    Zero            = 0x0,
    One             = 0x1,
    DstColor        = 0x2,
    InverseDstColor = 0x3,
    SrcAlpha        = 0x4,
    InverseSrcAlpha = 0x5,
    DstAlpha        = 0x6,
    InverseDstAlpha = 0x7,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DstBlendFactor {
    #[default]
    Zero            = 0x0,
    One             = 0x1,
    SrcColor        = 0x2,
    InverseSrcColor = 0x3,
    SrcAlpha        = 0x4,
    InverseSrcAlpha = 0x5,
    DstAlpha        = 0x6,
    InverseDstAlpha = 0x7,
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendLogicOp {
    #[default]
    Clear       = 0x0,
    And         = 0x1,
    ReverseAnd  = 0x2,
    Copy        = 0x3,
    InverseAnd  = 0x4,
    Noop        = 0x5,
    Xor         = 0x6,
    Or          = 0x7,
    Nor         = 0x8,
    Equiv       = 0x9,
    Inverse     = 0xA,
    ReverseOr   = 0xB,
    InverseCopy = 0xC,
    InverseOr   = 0xD,
    Nand        = 0xE,
    Set         = 0xF,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendMode {
    #[bits(0)]
    pub enable: bool,
    #[bits(1)]
    pub logic_op_enable: bool,
    #[bits(2)]
    pub dither_enable: bool,
    #[bits(3)]
    pub color_mask: bool,
    #[bits(4)]
    pub alpha_mask: bool,
    #[bits(5..8)]
    pub dst_factor: DstBlendFactor,
    #[bits(8..11)]
    pub src_factor: SrcBlendFactor,
    #[bits(11)]
    pub blend_subtract: bool,
    #[bits(12..16)]
    pub logic_op: BlendLogicOp,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorCorner {
    #[bits(0..11)]
    pub y_plus_342: u11,
    #[bits(12..23)]
    pub x_plus_342: u11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorOffset {
    #[bits(0..10)]
    pub x_plus_342_div_2: u10,
    #[bits(10..20)]
    pub y_plus_342_div_2: u10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scissor {
    pub top_left: ScissorCorner,
    pub bottom_right: ScissorCorner,
    pub offset: ScissorOffset,
}

impl Scissor {
    pub fn top_left(&self) -> (u32, u32) {
        let base_x = self.top_left.x_plus_342().value() as u32;
        let base_y = self.top_left.y_plus_342().value() as u32;
        (base_x.saturating_sub(342), base_y.saturating_sub(342))
    }

    pub fn bottom_right(&self) -> (u32, u32) {
        let base_x = self.bottom_right.x_plus_342().value() as u32 + 1;
        let base_y = self.bottom_right.y_plus_342().value() as u32 + 1;
        (base_x.saturating_sub(342), base_y.saturating_sub(342))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let (left, top) = self.top_left();
        let (right, bottom) = self.bottom_right();
        (right.saturating_sub(left), bottom.saturating_sub(top))
    }

    pub fn offset(&self) -> (i32, i32) {
        let base_x = self.offset.x_plus_342_div_2().value() as i32 * 2;
        let base_y = self.offset.y_plus_342_div_2().value() as i32 * 2;
        (base_x - 342, base_y - 342)
    }
}

/// Typed views over the pixel engine part of bank A.
pub trait PixelRegs {
    fn reg(&self, reg: Reg) -> u32;

    fn control(&self) -> Control {
        Control::from_bits(self.reg(Reg::PixelControl))
    }

    fn depth_mode(&self) -> DepthMode {
        DepthMode::from_bits(self.reg(Reg::PixelZMode))
    }

    fn blend_mode(&self) -> BlendMode {
        BlendMode::from_bits(self.reg(Reg::PixelBlendMode))
    }

    fn constant_alpha(&self) -> ConstantAlpha {
        ConstantAlpha::from_bits(self.reg(Reg::PixelConstantAlpha))
    }

    fn scissor(&self) -> Scissor {
        Scissor {
            top_left: ScissorCorner::from_bits(self.reg(Reg::ScissorTopLeft)),
            bottom_right: ScissorCorner::from_bits(self.reg(Reg::ScissorBottomRight)),
            offset: ScissorOffset::from_bits(self.reg(Reg::ScissorOffset)),
        }
    }

    fn copy_src(&self) -> CopySrc {
        CopySrc::from_bits(self.reg(Reg::PixelCopySrc))
    }

    fn copy_dims(&self) -> CopyDims {
        CopyDims::from_bits(self.reg(Reg::PixelCopyDimensions))
    }

    fn copy_dst(&self) -> Address {
        Address(self.reg(Reg::PixelCopyDst) << 5)
    }

    fn copy_stride(&self) -> u32 {
        self.reg(Reg::PixelCopyDstStride) << 5
    }

    /// The clear color as RGBA.
    fn clear_color(&self) -> [u8; 4] {
        let ar = self.reg(Reg::PixelCopyClearAr);
        let gb = self.reg(Reg::PixelCopyClearGb);
        [ar as u8, (gb >> 8) as u8, gb as u8, (ar >> 8) as u8]
    }

    fn clear_depth(&self) -> u32 {
        self.reg(Reg::PixelCopyClearZ) & 0x00FF_FFFF
    }
}

impl PixelRegs for [u32; 256] {
    #[inline(always)]
    fn reg(&self, reg: Reg) -> u32 {
        self[reg as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clear_color_layout() {
        let mut regs = [0u32; 256];
        regs[Reg::PixelCopyClearAr as usize] = 0x80_11;
        regs[Reg::PixelCopyClearGb as usize] = 0x22_33;
        assert_eq!(regs.clear_color(), [0x11, 0x22, 0x33, 0x80]);
    }

    #[test]
    fn scissor_rectangle() {
        let mut regs = [0u32; 256];
        regs[Reg::ScissorTopLeft as usize] = (342 << 12) | 342;
        regs[Reg::ScissorBottomRight as usize] = ((342 + 639) << 12) | (342 + 479);
        regs[Reg::ScissorOffset as usize] = (171 << 10) | 171;

        let scissor = regs.scissor();
        assert_eq!(scissor.top_left(), (0, 0));
        assert_eq!(scissor.dimensions(), (640, 480));
        assert_eq!(scissor.offset(), (0, 0));
    }

    #[test]
    fn interrupt_acknowledge() {
        let mut status = InterruptStatus::default()
            .with_token_enabled(true)
            .with_token(true);
        assert!(status.token_raised());

        status.write(0b0101);
        assert!(status.token_enabled());
        assert!(!status.token());
    }
}

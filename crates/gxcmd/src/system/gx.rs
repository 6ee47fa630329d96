//! Graphics subsystem (GX).
pub mod cmd;
pub mod dlist;
pub mod index;
pub mod loader;
pub mod pix;
pub mod tex;
pub mod vertex;
pub mod xform;

use std::sync::atomic::Ordering;

use bitos::integer::{u3, u4};
use bitos::{BitUtils, bitos};
use seq_macro::seq;
use strum::FromRepr;

use crate::modules::render::{Action, CopyArgs};
use crate::modules::shader::Change;
use crate::system::gx::pix::PixelRegs;
use crate::system::{Event, System};

/// Maximum value for the 24-bit depth.
pub const DEPTH_24_BIT_MAX: u32 = (1 << 24) - 1;
/// Bank A values are 24 bits wide.
pub const BP_VALUE_MASK: u32 = 0x00FF_FFFF;

/// An internal GX register.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Reg {
    GenMode            = 0x00,
    GenFilter0         = 0x01,
    GenFilter1         = 0x02,
    GenFilter2         = 0x03,
    GenFilter3         = 0x04,

    IndMtxA0           = 0x06,
    IndMtxB0           = 0x07,
    IndMtxC0           = 0x08,
    IndMtxA1           = 0x09,
    IndMtxB1           = 0x0A,
    IndMtxC1           = 0x0B,
    IndMtxA2           = 0x0C,
    IndMtxB2           = 0x0D,
    IndMtxC2           = 0x0E,

    BumpIMask          = 0x0F,

    IndCmd0            = 0x10,
    IndCmd1            = 0x11,
    IndCmd2            = 0x12,
    IndCmd3            = 0x13,
    IndCmd4            = 0x14,
    IndCmd5            = 0x15,
    IndCmd6            = 0x16,
    IndCmd7            = 0x17,
    IndCmd8            = 0x18,
    IndCmd9            = 0x19,
    IndCmd10           = 0x1A,
    IndCmd11           = 0x1B,
    IndCmd12           = 0x1C,
    IndCmd13           = 0x1D,
    IndCmd14           = 0x1E,
    IndCmd15           = 0x1F,

    ScissorTopLeft     = 0x20,
    ScissorBottomRight = 0x21,

    SetupLpSize        = 0x22,
    SetupPerf          = 0x23,
    RasterPerf         = 0x24,
    RasterSs0          = 0x25,
    RasterSs1          = 0x26,
    RasterIRef         = 0x27,

    TevRefs01          = 0x28,
    TevRefs23          = 0x29,
    TevRefs45          = 0x2A,
    TevRefs67          = 0x2B,
    TevRefs89          = 0x2C,
    TevRefsAB          = 0x2D,
    TevRefsCD          = 0x2E,
    TevRefsEF          = 0x2F,

    TexScaleU0         = 0x30,
    TexScaleV0         = 0x31,
    TexScaleU1         = 0x32,
    TexScaleV1         = 0x33,
    TexScaleU2         = 0x34,
    TexScaleV2         = 0x35,
    TexScaleU3         = 0x36,
    TexScaleV3         = 0x37,
    TexScaleU4         = 0x38,
    TexScaleV4         = 0x39,
    TexScaleU5         = 0x3A,
    TexScaleV5         = 0x3B,
    TexScaleU6         = 0x3C,
    TexScaleV6         = 0x3D,
    TexScaleU7         = 0x3E,
    TexScaleV7         = 0x3F,

    PixelZMode          = 0x40,
    PixelBlendMode      = 0x41,
    PixelConstantAlpha  = 0x42,
    PixelControl        = 0x43,
    PixelFieldMask      = 0x44,
    PixelDone           = 0x45,
    PixelRefresh        = 0x46,
    PixelToken          = 0x47,
    PixelTokenInt       = 0x48,
    PixelCopySrc        = 0x49,
    PixelCopyDimensions = 0x4A,
    PixelCopyDst        = 0x4B,
    PixelCopyDstStride  = 0x4D,
    PixelCopyScale      = 0x4E,
    PixelCopyClearAr    = 0x4F,
    PixelCopyClearGb    = 0x50,
    PixelCopyClearZ     = 0x51,
    PixelCopyCmd        = 0x52,
    PixelCopyFilter0    = 0x53,
    PixelCopyFilter1    = 0x54,
    PixelXBound         = 0x55,
    PixelYBound         = 0x56,
    PixelPerfMode       = 0x57,
    PixelChicken        = 0x58,
    ScissorOffset       = 0x59,

    TexLoadBlock0      = 0x60,
    TexLoadBlock1      = 0x61,
    TexLoadBlock2      = 0x62,
    TexLoadBlock3      = 0x63,
    TexLutAddress      = 0x64,
    TexLutLoad         = 0x65,
    TexInvTags         = 0x66,
    TexPerfMode        = 0x67,
    TexFieldMode       = 0x68,
    TexRefresh         = 0x69,

    TexSampler0        = 0x80,
    TexSampler1        = 0x81,
    TexSampler2        = 0x82,
    TexSampler3        = 0x83,
    TexLod0            = 0x84,
    TexLod1            = 0x85,
    TexLod2            = 0x86,
    TexLod3            = 0x87,
    TexFormat0         = 0x88,
    TexFormat1         = 0x89,
    TexFormat2         = 0x8A,
    TexFormat3         = 0x8B,
    TexEvenLodAddress0 = 0x8C,
    TexEvenLodAddress1 = 0x8D,
    TexEvenLodAddress2 = 0x8E,
    TexEvenLodAddress3 = 0x8F,
    TexOddLodAddress0  = 0x90,
    TexOddLodAddress1  = 0x91,
    TexOddLodAddress2  = 0x92,
    TexOddLodAddress3  = 0x93,
    TexAddress0        = 0x94,
    TexAddress1        = 0x95,
    TexAddress2        = 0x96,
    TexAddress3        = 0x97,
    TexLutRef0         = 0x98,
    TexLutRef1         = 0x99,
    TexLutRef2         = 0x9A,
    TexLutRef3         = 0x9B,

    TexSampler4        = 0xA0,
    TexSampler5        = 0xA1,
    TexSampler6        = 0xA2,
    TexSampler7        = 0xA3,
    TexLod4            = 0xA4,
    TexLod5            = 0xA5,
    TexLod6            = 0xA6,
    TexLod7            = 0xA7,
    TexFormat4         = 0xA8,
    TexFormat5         = 0xA9,
    TexFormat6         = 0xAA,
    TexFormat7         = 0xAB,
    TexEvenLodAddress4 = 0xAC,
    TexEvenLodAddress5 = 0xAD,
    TexEvenLodAddress6 = 0xAE,
    TexEvenLodAddress7 = 0xAF,
    TexOddLodAddress4  = 0xB0,
    TexOddLodAddress5  = 0xB1,
    TexOddLodAddress6  = 0xB2,
    TexOddLodAddress7  = 0xB3,
    TexAddress4        = 0xB4,
    TexAddress5        = 0xB5,
    TexAddress6        = 0xB6,
    TexAddress7        = 0xB7,
    TexLutRef4         = 0xB8,
    TexLutRef5         = 0xB9,
    TexLutRef6         = 0xBA,
    TexLutRef7         = 0xBB,

    TevColorEnv0       = 0xC0,
    TevAlphaEnv0       = 0xC1,
    TevColorEnv1       = 0xC2,
    TevAlphaEnv1       = 0xC3,
    TevColorEnv2       = 0xC4,
    TevAlphaEnv2       = 0xC5,
    TevColorEnv3       = 0xC6,
    TevAlphaEnv3       = 0xC7,
    TevColorEnv4       = 0xC8,
    TevAlphaEnv4       = 0xC9,
    TevColorEnv5       = 0xCA,
    TevAlphaEnv5       = 0xCB,
    TevColorEnv6       = 0xCC,
    TevAlphaEnv6       = 0xCD,
    TevColorEnv7       = 0xCE,
    TevAlphaEnv7       = 0xCF,
    TevColorEnv8       = 0xD0,
    TevAlphaEnv8       = 0xD1,
    TevColorEnv9       = 0xD2,
    TevAlphaEnv9       = 0xD3,
    TevColorEnv10      = 0xD4,
    TevAlphaEnv10      = 0xD5,
    TevColorEnv11      = 0xD6,
    TevAlphaEnv11      = 0xD7,
    TevColorEnv12      = 0xD8,
    TevAlphaEnv12      = 0xD9,
    TevColorEnv13      = 0xDA,
    TevAlphaEnv13      = 0xDB,
    TevColorEnv14      = 0xDC,
    TevAlphaEnv14      = 0xDD,
    TevColorEnv15      = 0xDE,
    TevAlphaEnv15      = 0xDF,

    TevRegister0Ar     = 0xE0,
    TevRegister0Gb     = 0xE1,
    TevRegister1Ar     = 0xE2,
    TevRegister1Gb     = 0xE3,
    TevRegister2Ar     = 0xE4,
    TevRegister2Gb     = 0xE5,
    TevRegister3Ar     = 0xE6,
    TevRegister3Gb     = 0xE7,

    TevRangeAdjC       = 0xE8,
    TevRangeAdj0       = 0xE9,
    TevRangeAdj1       = 0xEA,
    TevRangeAdj2       = 0xEB,
    TevRangeAdj3       = 0xEC,
    TevRangeAdj4       = 0xED,

    TevFog0            = 0xEE,
    TevFog1            = 0xEF,
    TevFog2            = 0xF0,
    TevFog3            = 0xF1,
    TevFogColor        = 0xF2,

    TevAlphaFunc       = 0xF3,
    TevDepthTexBias    = 0xF4,
    TevDepthTexMode    = 0xF5,
    TevKSel0           = 0xF6,
    TevKSel1           = 0xF7,
    TevKSel2           = 0xF8,
    TevKSel3           = 0xF9,
    TevKSel4           = 0xFA,
    TevKSel5           = 0xFB,
    TevKSel6           = 0xFC,
    TevKSel7           = 0xFD,

    WriteMask          = 0xFE,
}

impl Reg {
    #[inline]
    pub fn texmap(&self) -> Option<u8> {
        seq! {
            N in 0..8 {
                match self {
                    #(
                          Self::TexSampler~N
                        | Self::TexLod~N
                        | Self::TexFormat~N
                        | Self::TexEvenLodAddress~N
                        | Self::TexOddLodAddress~N
                        | Self::TexAddress~N
                        | Self::TexLutRef~N
                        => Some(N),
                    )*
                    _ => None
                }
            }
        }
    }

    #[inline]
    pub fn is_tev_env(&self) -> bool {
        (Self::TevColorEnv0 as u8..=Self::TevAlphaEnv15 as u8).contains(&(*self as u8))
    }

    #[inline]
    pub fn is_tev_register(&self) -> bool {
        (Self::TevRegister0Ar as u8..=Self::TevRegister3Gb as u8).contains(&(*self as u8))
    }

    #[inline]
    pub fn is_pixel_clear(&self) -> bool {
        matches!(
            self,
            Self::PixelCopyClearAr | Self::PixelCopyClearGb | Self::PixelCopyClearZ
        )
    }

    #[inline]
    pub fn is_scissor(&self) -> bool {
        matches!(
            self,
            Self::ScissorTopLeft | Self::ScissorBottomRight | Self::ScissorOffset
        )
    }

    /// Registers whose writes trigger an action every time, even if the value is unchanged.
    #[inline]
    pub fn always_reapply(&self) -> bool {
        matches!(
            self,
            Self::PixelDone
                | Self::PixelToken
                | Self::PixelTokenInt
                | Self::PixelCopyCmd
                | Self::PixelXBound
                | Self::PixelYBound
                | Self::PixelPerfMode
                | Self::TexLoadBlock3
                | Self::TexLutAddress
                | Self::TexLutLoad
                | Self::TexInvTags
        )
    }
}

/// The topology of a primitive.
#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    QuadList      = 0b000,
    QuadList2     = 0b001,
    TriangleList  = 0b010,
    TriangleStrip = 0b011,
    TriangleFan   = 0b100,
    LineList      = 0b101,
    LineStrip     = 0b110,
    PointList     = 0b111,
}

impl Topology {
    pub fn class(self) -> PrimitiveClass {
        match self {
            Self::LineList | Self::LineStrip => PrimitiveClass::Lines,
            Self::PointList => PrimitiveClass::Points,
            _ => PrimitiveClass::Triangles,
        }
    }
}

/// Topologies that can share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveClass {
    Triangles,
    Lines,
    Points,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullingMode {
    #[default]
    None  = 0b00,
    Back  = 0b01,
    Front = 0b10,
    All   = 0b11,
}

#[bitos(32)]
#[derive(Debug, Default)]
pub struct GenMode {
    #[bits(0..4)]
    pub tex_coords_count: u4,
    #[bits(4..8)]
    pub color_channels_count: u4,
    #[bits(9)]
    pub multisampling: bool,
    #[bits(10..14)]
    pub tev_stages_minus_one: u4,
    #[bits(14..16)]
    pub culling_mode: CullingMode,
    #[bits(16..19)]
    pub bumpmap_count: u3,
    #[bits(19)]
    pub z_freeze: bool,
}

/// GPU state.
#[derive(Debug)]
pub struct Gpu {
    /// Bank A. The write mask of the next write lives at [`Reg::WriteMask`].
    pub bp: [u32; 256],
    /// Bank B.
    pub cmd: cmd::Interface,
    /// Bank C.
    pub xform: xform::Interface,
    /// Texture memory and dirty texture maps.
    pub tex: tex::Interface,
}

impl Default for Gpu {
    fn default() -> Self {
        let mut bp = [0; 256];
        bp[Reg::WriteMask as usize] = BP_VALUE_MASK;

        Self {
            bp,
            cmd: Default::default(),
            xform: Default::default(),
            tex: Default::default(),
        }
    }
}

impl Gpu {
    pub fn gen_mode(&self) -> GenMode {
        GenMode::from_bits(self.bp[Reg::GenMode as usize])
    }
}

/// Writes a value to a bank A register.
///
/// The value is masked by the write mask set by the previous write to [`Reg::WriteMask`], if
/// any. Writes that change no bit are elided unless the register always reapplies.
pub fn write_bp(sys: &mut System, register: u8, value: u32) {
    let value = value & BP_VALUE_MASK;
    if register == Reg::WriteMask as u8 {
        sys.gpu.bp[register as usize] = value;
        return;
    }

    let mask = std::mem::replace(&mut sys.gpu.bp[Reg::WriteMask as usize], BP_VALUE_MASK);
    let old = sys.gpu.bp[register as usize];
    let new = (old & !mask) | (value & mask);
    let changes = (old ^ new) & BP_VALUE_MASK;

    let reg = Reg::from_repr(register);
    if changes == 0 && !reg.is_some_and(|r| r.always_reapply()) {
        return;
    }

    vertex::flush(sys);
    sys.gpu.bp[register as usize] = new;

    let Some(reg) = reg else {
        tracing::warn!("write to unknown BP register 0x{register:02X}: 0x{new:06X}");
        return;
    };

    self::apply(sys, reg, new, changes);
}

fn notify(sys: &mut System, change: Change) {
    sys.modules.shader.notify(change);
}

fn exec(sys: &mut System, action: Action) {
    sys.modules.render.exec(action);
}

/// Applies the side effects of a write to a bank A register.
fn apply(sys: &mut System, reg: Reg, value: u32, changes: u32) {
    let index = reg as u8;
    match reg {
        Reg::GenMode => {
            if changes.bits(14, 16) != 0 {
                let mode = sys.gpu.gen_mode().culling_mode();
                self::exec(sys, Action::SetCullingMode(mode));
            }

            self::notify(sys, Change::GenMode);
        }
        Reg::GenFilter0 | Reg::GenFilter1 | Reg::GenFilter2 | Reg::GenFilter3 => (),
        Reg::IndMtxA0
        | Reg::IndMtxB0
        | Reg::IndMtxC0
        | Reg::IndMtxA1
        | Reg::IndMtxB1
        | Reg::IndMtxC1
        | Reg::IndMtxA2
        | Reg::IndMtxB2
        | Reg::IndMtxC2 => {
            self::notify(sys, Change::IndirectMatrix((index - Reg::IndMtxA0 as u8) / 3));
        }
        Reg::BumpIMask => (),
        _ if (Reg::IndCmd0 as u8..=Reg::IndCmd15 as u8).contains(&index) => {
            self::notify(sys, Change::TevIndirect(index - Reg::IndCmd0 as u8));
        }
        _ if reg.is_scissor() => {
            let scissor = sys.gpu.bp.scissor();
            self::exec(sys, Action::SetScissor(scissor));
            self::notify(sys, Change::Viewport);
        }
        Reg::SetupLpSize => self::notify(sys, Change::LinePointWidth),
        Reg::SetupPerf | Reg::RasterPerf => (),
        Reg::RasterSs0 | Reg::RasterSs1 => {
            self::notify(sys, Change::IndirectTexScale(index - Reg::RasterSs0 as u8));
        }
        Reg::RasterIRef => self::notify(sys, Change::IndirectRefs),
        _ if (Reg::TevRefs01 as u8..=Reg::TevRefsEF as u8).contains(&index) => {
            self::notify(sys, Change::TevOrder(index - Reg::TevRefs01 as u8));
        }
        _ if (Reg::TexScaleU0 as u8..=Reg::TexScaleV7 as u8).contains(&index) => {
            self::notify(sys, Change::TexCoordScale((index - Reg::TexScaleU0 as u8) / 2));
        }
        Reg::PixelZMode => {
            let mode = sys.gpu.bp.depth_mode();
            self::exec(sys, Action::SetDepthMode(mode));
        }
        Reg::PixelBlendMode => {
            if changes & 0xFFFF != 0 {
                let mode = sys.gpu.bp.blend_mode();
                self::exec(sys, Action::SetBlendMode(mode));
                self::notify(sys, Change::BlendMode);
            }
        }
        Reg::PixelConstantAlpha => {
            let alpha = sys.gpu.bp.constant_alpha();
            self::exec(sys, Action::SetConstantAlpha(alpha));
            self::notify(sys, Change::DestAlpha);
        }
        Reg::PixelControl => {
            let format = sys.gpu.bp.control().format();
            self::exec(sys, Action::SetFramebufferFormat(format));
            self::notify(sys, Change::ZModeControl);
        }
        Reg::PixelFieldMask | Reg::PixelRefresh => (),
        Reg::PixelDone => {
            tracing::trace!("draw done");
            sys.send(Event::Finish);
        }
        Reg::PixelToken | Reg::PixelTokenInt => {
            let token = value as u16;
            let interrupt = reg == Reg::PixelTokenInt;
            sys.fifo.token.store(token, Ordering::Release);
            tracing::trace!(interrupt, "token 0x{token:04X}");
            sys.send(Event::Token { token, interrupt });
        }
        Reg::PixelCopySrc
        | Reg::PixelCopyDimensions
        | Reg::PixelCopyDst
        | Reg::PixelCopyDstStride
        | Reg::PixelCopyScale
        | Reg::PixelCopyFilter0
        | Reg::PixelCopyFilter1
        | Reg::PixelChicken => (),
        _ if reg.is_pixel_clear() => (),
        Reg::PixelCopyCmd => self::copy_efb(sys, value),
        Reg::PixelXBound | Reg::PixelYBound => {
            let axis = index - Reg::PixelXBound as u8;
            self::exec(
                sys,
                Action::SetBoundingBox {
                    index: axis,
                    min: value.bits(0, 10) as u16,
                    max: value.bits(10, 20) as u16,
                },
            );
        }
        Reg::PixelPerfMode => tracing::trace!("cleared pixel perf counters"),
        Reg::TexLoadBlock0 | Reg::TexLoadBlock1 | Reg::TexLoadBlock2 => (),
        Reg::TexLoadBlock3 => tex::preload(sys),
        Reg::TexLutAddress => (),
        Reg::TexLutLoad => tex::load_tlut(sys),
        Reg::TexInvTags => self::exec(sys, Action::InvalidateTextureCache(value)),
        Reg::TexPerfMode | Reg::TexFieldMode | Reg::TexRefresh => (),
        _ if reg.is_tev_env() => {
            self::notify(sys, Change::TevCombiner((index - Reg::TevColorEnv0 as u8) / 2));
        }
        _ if reg.is_tev_register() => {
            let konst = value.bit(23);
            let index = (index - Reg::TevRegister0Ar as u8) / 2;
            self::notify(sys, Change::TevColor { index, konst });
        }
        _ if (Reg::TevRangeAdjC as u8..=Reg::TevRangeAdj4 as u8).contains(&index) => {
            self::notify(sys, Change::FogRangeAdjust);
        }
        Reg::TevFog0 | Reg::TevFog1 | Reg::TevFog2 | Reg::TevFog3 => {
            self::notify(sys, Change::FogParam);
        }
        Reg::TevFogColor => self::notify(sys, Change::FogColor),
        Reg::TevAlphaFunc => self::notify(sys, Change::AlphaTest),
        Reg::TevDepthTexBias => self::notify(sys, Change::ZTextureBias),
        Reg::TevDepthTexMode => self::notify(sys, Change::ZTextureOp),
        _ if (Reg::TevKSel0 as u8..=Reg::TevKSel7 as u8).contains(&index) => {
            self::notify(sys, Change::TevKSel(index - Reg::TevKSel0 as u8));
        }
        _ => match reg.texmap() {
            Some(map) => sys.gpu.tex.mark_dirty(map),
            None => tracing::warn!("unimplemented write to internal BP register {reg:?}"),
        },
    }
}

fn copy_efb(sys: &mut System, value: u32) {
    let cmd = pix::CopyCmd::from_bits(value);
    let bp = &sys.gpu.bp;
    let args = CopyArgs {
        src: bp.copy_src(),
        dims: bp.copy_dims(),
        dst: bp.copy_dst(),
        stride: bp.copy_stride(),
        format: cmd.format().value(),
        half: cmd.half(),
        clear: cmd.clear(),
        to_xfb: cmd.to_xfb(),
    };

    tracing::trace!(?args, "efb copy");
    let clear = Action::ClearScreen {
        color: bp.clear_color(),
        depth: bp.clear_depth().min(DEPTH_24_BIT_MAX),
    };

    self::exec(sys, Action::CopyEfb(args));
    if cmd.clear() {
        self::exec(sys, clear);
    }
}

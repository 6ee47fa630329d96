//! Renderer module interface.

use static_assertions::const_assert;

use crate::Address;
use crate::system::gx::loader::NativeFormat;
use crate::system::gx::pix::{
    BlendMode, BufferFormat, ConstantAlpha, CopyDims, CopySrc, DepthMode, Scissor,
};
use crate::system::gx::{CullingMode, PrimitiveClass};

/// A batch of decoded vertices and the indices that assemble them into primitives.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// The primitive class every index list in this batch belongs to.
    pub class: PrimitiveClass,
    /// Layout of a single vertex in `vertices`.
    pub format: NativeFormat,
    /// Native vertex data, `format.stride` bytes per vertex.
    pub vertices: Vec<u8>,
    pub triangles: Vec<u16>,
    pub lines: Vec<u16>,
    pub points: Vec<u16>,
    /// Texture maps whose configuration changed since the previous batch, one bit per map.
    pub dirty_textures: u8,
}

impl Batch {
    /// Number of vertices in this batch.
    pub fn vertex_count(&self) -> usize {
        self.vertices
            .len()
            .checked_div(self.format.stride as usize)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyArgs {
    pub src: CopySrc,
    pub dims: CopyDims,
    pub dst: Address,
    pub stride: u32,
    pub format: u8,
    pub half: bool,
    pub clear: bool,
    pub to_xfb: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Draw(Box<Batch>),
    SetCullingMode(CullingMode),
    SetScissor(Scissor),
    SetDepthMode(DepthMode),
    SetBlendMode(BlendMode),
    SetConstantAlpha(ConstantAlpha),
    SetFramebufferFormat(BufferFormat),
    CopyEfb(CopyArgs),
    /// Clears the framebuffer to an RGBA color and a 24-bit depth.
    ClearScreen {
        color: [u8; 4],
        depth: u32,
    },
    SetBoundingBox {
        index: u8,
        min: u16,
        max: u16,
    },
    InvalidateTextureCache(u32),
    /// A region of texture memory was overwritten.
    LoadTmem {
        offset: u32,
        length: u32,
    },
}

const_assert!(size_of::<Action>() <= 64);

pub trait RenderModule: Send {
    fn exec(&mut self, action: Action);
}

/// An implementation of [`RenderModule`] that does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NopRenderModule;

impl RenderModule for NopRenderModule {
    fn exec(&mut self, _: Action) {}
}

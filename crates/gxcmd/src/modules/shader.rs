//! Shader constant module interface.
//!
//! The shader module owns the uniforms of the host pipeline. It is told which hardware state
//! changed and reads whatever it needs from the register banks afterwards.

use std::ops::Range;

/// A change to state that feeds the vertex or pixel shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    // pixel side
    GenMode,
    IndirectMatrix(u8),
    IndirectTexScale(u8),
    IndirectRefs,
    TevIndirect(u8),
    TevOrder(u8),
    TevCombiner(u8),
    TevKSel(u8),
    TevColor { index: u8, konst: bool },
    TexCoordScale(u8),
    Viewport,
    LinePointWidth,
    ZModeControl,
    BlendMode,
    DestAlpha,
    AlphaTest,
    FogRangeAdjust,
    FogParam,
    FogColor,
    ZTextureBias,
    ZTextureOp,

    // vertex side
    Projection,
    MatrixIndices,
    Matrices(Range<u16>),
    NormalMatrices(Range<u16>),
    PostMatrices(Range<u16>),
    Lights(Range<u16>),
    MaterialColor(u8),
    AmbientColor(u8),
    Lighting,
    TexGen,
    VertexSpec,
}

pub trait ShaderModule: Send {
    fn notify(&mut self, change: Change);
}

/// An implementation of [`ShaderModule`] that does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NopShaderModule;

impl ShaderModule for NopShaderModule {
    fn notify(&mut self, _: Change) {}
}

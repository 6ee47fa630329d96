//! Interpretation of loader steps.
use zerocopy::IntoBytes;

use super::{Inputs, Source, Step, Touched};
use crate::system::gx::cmd::ArraySlot;
use crate::system::gx::cmd::attributes::{ColorFormat, CoordsFormat, NormalDescriptor};

/// Nine `f32` normal components.
const MAX_ATTRIBUTE_SIZE: usize = 36;

/// Per-vertex decoding state.
#[derive(Debug, Default)]
pub struct Scratch {
    pos_matrix: u32,
    tex_matrices: [u32; 8],
    /// Texture unit the next texture coordinate step refers to.
    tex: usize,
}

#[inline(always)]
fn be16(data: &[u8]) -> u32 {
    u16::from_be_bytes([data[0], data[1]]) as u32
}

/// Reads an element of an external array into `buf`. Unmapped memory reads as zeroes.
fn fetch(
    inputs: &Inputs<'_>,
    slot: ArraySlot,
    index: u32,
    offset: u32,
    buf: &mut [u8],
    touched: Option<&mut Touched>,
) {
    let array = inputs.arrays[slot as usize];
    let addr = array.address + (index * array.stride + offset);
    if !inputs.mem.read(addr, buf) {
        tracing::trace!("vertex array read from unmapped address {addr}");
        buf.fill(0);
    }

    if let Some(touched) = touched {
        touched.record(slot, addr, buf.len() as u32);
    }
}

/// Loads the raw bytes of an attribute into `buf`, either from the vertex or from its array.
fn attribute<'b>(
    source: Source,
    data: &[u8],
    inputs: &Inputs<'_>,
    buf: &'b mut [u8],
    touched: Option<&mut Touched>,
) -> &'b [u8] {
    match source {
        Source::Direct => buf.copy_from_slice(&data[..buf.len()]),
        Source::Index8(slot) => fetch(inputs, slot, data[0] as u32, 0, buf, touched),
        Source::Index16(slot) => fetch(inputs, slot, be16(data), 0, buf, touched),
    }

    buf
}

/// Converts raw coordinates into floats. Integer formats are multiplied by `scale`.
fn coords(format: CoordsFormat, data: &[u8], scale: f32, out: &mut [f32]) {
    let size = format.size() as usize;
    for (value, bytes) in out.iter_mut().zip(data.chunks_exact(size)) {
        *value = match format {
            CoordsFormat::U8 => bytes[0] as f32 * scale,
            CoordsFormat::I8 => bytes[0] as i8 as f32 * scale,
            CoordsFormat::U16 => be16(bytes) as f32 * scale,
            CoordsFormat::I16 => be16(bytes) as u16 as i16 as f32 * scale,
            _ => f32::from_bits(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        };
    }
}

#[inline(always)]
fn expand5(x: u32) -> u8 {
    ((x << 3) | (x >> 2)) as u8
}

#[inline(always)]
fn expand6(x: u32) -> u8 {
    ((x << 2) | (x >> 4)) as u8
}

#[inline(always)]
fn expand4(x: u32) -> u8 {
    (x * 0x11) as u8
}

/// Converts a raw color into RGBA8.
pub fn color(format: ColorFormat, data: &[u8]) -> [u8; 4] {
    match format {
        ColorFormat::Rgb565 => {
            let v = be16(data);
            [
                expand5((v >> 11) & 0x1F),
                expand6((v >> 5) & 0x3F),
                expand5(v & 0x1F),
                0xFF,
            ]
        }
        ColorFormat::Rgb888 | ColorFormat::Rgb888x => [data[0], data[1], data[2], 0xFF],
        ColorFormat::Rgba4444 => {
            let v = be16(data);
            [
                expand4(v >> 12),
                expand4((v >> 8) & 0xF),
                expand4((v >> 4) & 0xF),
                expand4(v & 0xF),
            ]
        }
        ColorFormat::Rgba6666 => {
            let v = u32::from_be_bytes([0, data[0], data[1], data[2]]);
            [
                expand6((v >> 18) & 0x3F),
                expand6((v >> 12) & 0x3F),
                expand6((v >> 6) & 0x3F),
                expand6(v & 0x3F),
            ]
        }
        _ => [data[0], data[1], data[2], data[3]],
    }
}

/// Executes a single step, returning how many bytes of `data` it consumed.
pub fn step(
    step: &Step,
    inputs: &Inputs<'_>,
    data: &[u8],
    scratch: &mut Scratch,
    out: &mut Vec<u8>,
    mut touched: Option<&mut Touched>,
) -> usize {
    let mut buf = [0u8; MAX_ATTRIBUTE_SIZE];
    match *step {
        Step::PosMatrixIndex => scratch.pos_matrix = (data[0] & 0x3F) as u32,
        Step::TexMatrixIndex(i) => scratch.tex_matrices[i as usize] = data[0] as u32,
        Step::Position {
            source,
            format,
            components,
        } => {
            let components = components as usize;
            let size = components * format.size() as usize;
            let raw = attribute(source, data, inputs, &mut buf[..size], touched);

            let mut values = [0.0f32; 3];
            coords(format, raw, inputs.scales[0], &mut values[..components]);
            out.extend_from_slice(values[..components].as_bytes());
        }
        Step::Normal {
            source,
            format,
            vectors,
            index3,
        } => {
            let component_size = format.size();
            let vector_size = 3 * component_size as usize;
            let size = vectors as usize * vector_size;

            let raw = match source {
                Source::Index8(slot) | Source::Index16(slot) if index3 => {
                    let index_size = if matches!(source, Source::Index8(_)) { 1 } else { 2 };
                    for k in 0..vectors as usize {
                        let at = k * index_size;
                        let index = if index_size == 1 {
                            data[at] as u32
                        } else {
                            be16(&data[at..])
                        };

                        fetch(
                            inputs,
                            slot,
                            index,
                            (k * vector_size) as u32,
                            &mut buf[k * vector_size..(k + 1) * vector_size],
                            touched.as_deref_mut(),
                        );
                    }

                    &buf[..size]
                }
                _ => attribute(source, data, inputs, &mut buf[..size], touched),
            };

            let scale = NormalDescriptor::default().with_format(format).scale();
            let mut values = [0.0f32; 9];
            let count = 3 * vectors as usize;
            coords(format, raw, scale, &mut values[..count]);
            out.extend_from_slice(values[..count].as_bytes());
        }
        Step::Color { source, format } => {
            let size = format.size() as usize;
            let raw = attribute(source, data, inputs, &mut buf[..size], touched);
            out.extend_from_slice(&self::color(format, raw));
        }
        Step::TexCoord {
            source,
            format,
            components,
            with_matrix,
        } => {
            let unit = scratch.tex;
            let components = components as usize;
            let size = components * format.size() as usize;
            let raw = attribute(source, data, inputs, &mut buf[..size], touched);

            let mut values = [0.0f32; 3];
            coords(format, raw, inputs.scales[1 + unit], &mut values[..components]);
            if with_matrix {
                values[2] = scratch.tex_matrices[unit] as f32;
                out.extend_from_slice(values.as_bytes());
            } else {
                out.extend_from_slice(values[..components].as_bytes());
            }

            scratch.tex += 1;
        }
        Step::TexMatrix => {
            let values = [0.0, 0.0, scratch.tex_matrices[scratch.tex] as f32];
            out.extend_from_slice(values.as_bytes());
            scratch.tex += 1;
        }
        Step::SkipTexCoord => scratch.tex += 1,
        Step::PosMatrixWriteBack => out.extend_from_slice(scratch.pos_matrix.as_bytes()),
    }

    step.raw_size() as usize
}

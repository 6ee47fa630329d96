//! Command processor (CP).
pub mod attributes;

use attributes::{AttributeMode, VertexAttributeTable};
use bitos::integer::u3;
use bitos::{BitUtils, bitos};
use strum::FromRepr;

use crate::Address;
use crate::address::PHYSICAL_MASK;
use crate::stream::BinReader;
use crate::system::gx::dlist::{self, Op, Recorder};
use crate::system::gx::{self, Topology, vertex, xform};
use crate::system::{DesyncError, System};

/// A command processor register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Reg {
    Unknown00       = 0x00,
    Unknown10       = 0x10,
    Unknown20       = 0x20,

    MatIndexLow     = 0x30,
    MatIndexHigh    = 0x40,

    // VCD
    VcdLow          = 0x50,
    VcdHigh         = 0x60,

    // VAT
    Vat0A           = 0x70,
    Vat1A           = 0x71,
    Vat2A           = 0x72,
    Vat3A           = 0x73,
    Vat4A           = 0x74,
    Vat5A           = 0x75,
    Vat6A           = 0x76,
    Vat7A           = 0x77,

    Vat0B           = 0x80,
    Vat1B           = 0x81,
    Vat2B           = 0x82,
    Vat3B           = 0x83,
    Vat4B           = 0x84,
    Vat5B           = 0x85,
    Vat6B           = 0x86,
    Vat7B           = 0x87,

    Vat0C           = 0x90,
    Vat1C           = 0x91,
    Vat2C           = 0x92,
    Vat3C           = 0x93,
    Vat4C           = 0x94,
    Vat5C           = 0x95,
    Vat6C           = 0x96,
    Vat7C           = 0x97,

    // Array Base
    PositionPtr     = 0xA0,
    NormalPtr       = 0xA1,
    Chan0Ptr        = 0xA2,
    Chan1Ptr        = 0xA3,
    Tex0CoordPtr    = 0xA4,
    Tex1CoordPtr    = 0xA5,
    Tex2CoordPtr    = 0xA6,
    Tex3CoordPtr    = 0xA7,
    Tex4CoordPtr    = 0xA8,
    Tex5CoordPtr    = 0xA9,
    Tex6CoordPtr    = 0xAA,
    Tex7CoordPtr    = 0xAB,
    GpArr0Ptr       = 0xAC,
    GpArr1Ptr       = 0xAD,
    GpArr2Ptr       = 0xAE,
    GpArr3Ptr       = 0xAF,

    // Array Stride
    PositionStride  = 0xB0,
    NormalStride    = 0xB1,
    Chan0Stride     = 0xB2,
    Chan1Stride     = 0xB3,
    Tex0CoordStride = 0xB4,
    Tex1CoordStride = 0xB5,
    Tex2CoordStride = 0xB6,
    Tex3CoordStride = 0xB7,
    Tex4CoordStride = 0xB8,
    Tex5CoordStride = 0xB9,
    Tex6CoordStride = 0xBA,
    Tex7CoordStride = 0xBB,
    GpArr0Stride    = 0xBC,
    GpArr1Stride    = 0xBD,
    GpArr2Stride    = 0xBE,
    GpArr3Stride    = 0xBF,
}

impl Reg {
    pub fn is_matrices_index(self) -> bool {
        matches!(self, Self::MatIndexLow | Self::MatIndexHigh)
    }

    pub fn is_vat(self) -> bool {
        (Self::Vat0A as u8..=Self::Vat7C as u8).contains(&(self as u8))
    }

    pub fn is_array_base(self) -> bool {
        (Self::PositionPtr as u8..=Self::GpArr3Ptr as u8).contains(&(self as u8))
    }

    pub fn is_array_stride(self) -> bool {
        (Self::PositionStride as u8..=Self::GpArr3Stride as u8).contains(&(self as u8))
    }
}

/// Indices of the external arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum ArraySlot {
    Position = 0x0,
    Normal   = 0x1,
    Chan0    = 0x2,
    Chan1    = 0x3,
    Tex0     = 0x4,
    Tex1     = 0x5,
    Tex2     = 0x6,
    Tex3     = 0x7,
    Tex4     = 0x8,
    Tex5     = 0x9,
    Tex6     = 0xA,
    Tex7     = 0xB,
    Gp0      = 0xC,
    Gp1      = 0xD,
    Gp2      = 0xE,
    Gp3      = 0xF,
}

impl ArraySlot {
    pub fn tex(index: usize) -> Self {
        Self::from_repr(Self::Tex0 as u8 + (index as u8 & 0x7)).unwrap_or(Self::Tex0)
    }

    pub fn general_purpose(index: u8) -> Self {
        Self::from_repr(Self::Gp0 as u8 + (index & 0x3)).unwrap_or(Self::Gp0)
    }
}

/// Describes which attributes are present in the vertices of primitives and how they are present.
#[bitos(64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexDescriptor {
    /// Whether the position/normal matrix index is present.
    #[bits(0)]
    pub pos_mat_index: bool,
    /// Whether the texture coordinate matrix N index is present.
    #[bits(1..9)]
    pub tex_coord_mat_index: [bool; 8],
    /// Whether the position attribute is present.
    #[bits(9..11)]
    pub position: AttributeMode,
    /// Whether the normal attribute is present.
    #[bits(11..13)]
    pub normal: AttributeMode,
    /// Whether the color channel 0 attribute is present.
    #[bits(13..15)]
    pub chan0: AttributeMode,
    /// Whether the color channel 1 attribute is present.
    #[bits(15..17)]
    pub chan1: AttributeMode,
    /// Whether the texture coordinate N attribute is present.
    #[bits(32..48)]
    pub tex_coord: [AttributeMode; 8],
}

impl VertexDescriptor {
    pub fn low(&self) -> u32 {
        self.to_bits() as u32
    }

    pub fn high(&self) -> u32 {
        (self.to_bits() >> 32) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArrayDescriptor {
    pub address: Address,
    pub stride: u32,
}

/// CP register state.
#[derive(Debug, Clone, Default)]
pub struct Interface {
    pub vertex_descriptor: VertexDescriptor,
    pub vertex_attr_tables: [VertexAttributeTable; 8],
    pub arrays: [ArrayDescriptor; 16],
    /// Matrix index words, mirrored into the transform unit.
    pub mat_index: [u32; 2],
}

impl Interface {
    pub fn array(&self, slot: ArraySlot) -> ArrayDescriptor {
        self.arrays[slot as usize]
    }
}

/// The opcode of a draw command.
#[bitos(8)]
#[derive(Debug, Clone, Copy)]
pub struct DrawOpcode {
    #[bits(0..3)]
    pub vat_index: u3,
    #[bits(3..6)]
    pub topology: Topology,
    #[bits(7)]
    pub is_draw: bool,
}

pub const OP_NOP: u8 = 0x00;
pub const OP_SET_CP: u8 = 0x08;
pub const OP_SET_XF: u8 = 0x10;
pub const OP_INDEXED_SET_XF_A: u8 = 0x20;
pub const OP_INDEXED_SET_XF_B: u8 = 0x28;
pub const OP_INDEXED_SET_XF_C: u8 = 0x30;
pub const OP_INDEXED_SET_XF_D: u8 = 0x38;
pub const OP_CALL: u8 = 0x40;
pub const OP_METRICS: u8 = 0x44;
pub const OP_INVALIDATE_VERTEX_CACHE: u8 = 0x48;
pub const OP_SET_BP: u8 = 0x61;

/// A decoded command. Variable length payloads borrow from the command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Nop,
    Metrics,
    InvalidateVertexCache,
    SetCp {
        register: u8,
        value: u32,
    },
    SetXf {
        start: u16,
        /// Big-endian words.
        values: &'a [u8],
    },
    IndexedSetXf {
        /// Which of the general purpose arrays to read from.
        array: u8,
        base: u16,
        length: u8,
        index: u16,
    },
    Call {
        address: Address,
        length: u32,
    },
    SetBp {
        register: u8,
        value: u32,
    },
    Draw {
        topology: Topology,
        vat: u8,
        count: u16,
        data: &'a [u8],
    },
}

/// Reads a command from the start of `data`, returning it and its size.
///
/// Returns `Ok(None)` if `data` does not contain the whole command yet. Nothing is consumed in that
/// case and the same bytes can be retried once more data is available.
pub fn read_command<'a>(
    sys: &mut System,
    data: &'a [u8],
) -> Result<Option<(Command<'a>, usize)>, DesyncError> {
    let mut reader = BinReader::new(data);
    let Some(opcode) = reader.read_be::<u8>() else {
        return Ok(None);
    };

    macro_rules! read {
        ($ty:ty) => {
            match reader.read_be::<$ty>() {
                Some(value) => value,
                None => return Ok(None),
            }
        };
    }

    let command = match opcode {
        OP_NOP => Command::Nop,
        OP_METRICS => Command::Metrics,
        OP_INVALIDATE_VERTEX_CACHE => Command::InvalidateVertexCache,
        OP_SET_CP => {
            let register = read!(u8);
            let value = read!(u32);
            Command::SetCp { register, value }
        }
        OP_SET_XF => {
            let header = read!(u32);
            let count = header.bits(16, 20) as usize + 1;
            let start = header.bits(0, 16) as u16;
            let Some(values) = reader.read_bytes(4 * count) else {
                return Ok(None);
            };

            Command::SetXf { start, values }
        }
        OP_INDEXED_SET_XF_A | OP_INDEXED_SET_XF_B | OP_INDEXED_SET_XF_C
        | OP_INDEXED_SET_XF_D => {
            let config = read!(u32);
            Command::IndexedSetXf {
                array: (opcode - OP_INDEXED_SET_XF_A) / 8,
                base: config.bits(0, 12) as u16,
                length: config.bits(12, 16) as u8 + 1,
                index: config.bits(16, 32) as u16,
            }
        }
        OP_CALL => {
            let address = Address(read!(u32));
            let length = read!(u32);
            Command::Call { address, length }
        }
        OP_SET_BP => {
            let word = read!(u32);
            Command::SetBp {
                register: word.bits(24, 32) as u8,
                value: word.bits(0, 24),
            }
        }
        _ if opcode & 0xC0 == 0x80 => {
            let opcode = DrawOpcode::from_bits(opcode);
            let count = read!(u16);
            let vat = opcode.vat_index().value();
            let loader = sys.loaders.get(&sys.gpu.cmd, vat, &mut sys.stats);
            let size = count as usize * loader.vertex_size() as usize;
            let Some(data) = reader.read_bytes(size) else {
                return Ok(None);
            };

            Command::Draw {
                topology: opcode.topology(),
                vat,
                count,
                data,
            }
        }
        _ => return Err(DesyncError::UnknownOpcode(opcode)),
    };

    Ok(Some((command, reader.consumed())))
}

/// Decodes and executes every complete command in `data`, returning how many bytes were consumed.
///
/// A trailing partial command is left unconsumed. If a `recorder` is given, every executed
/// operation is also recorded into it.
pub fn run(
    sys: &mut System,
    data: &[u8],
    mut recorder: Option<&mut Recorder>,
) -> Result<usize, DesyncError> {
    let mut consumed = 0;
    while consumed < data.len() {
        let Some((command, size)) = self::read_command(sys, &data[consumed..])? else {
            break;
        };

        tracing::trace!("executing {command:02X?}");
        self::execute(sys, command, recorder.as_deref_mut())?;
        consumed += size;

        if sys.halted {
            break;
        }
    }

    Ok(consumed)
}

fn execute(
    sys: &mut System,
    command: Command<'_>,
    mut recorder: Option<&mut Recorder>,
) -> Result<(), DesyncError> {
    match command {
        Command::Nop | Command::Metrics | Command::InvalidateVertexCache => (),
        Command::SetCp { register, value } => {
            self::set_register(sys, register, value);
            if let Some(rec) = recorder {
                rec.push(Op::Cp { register, value });
            }
        }
        Command::SetBp { register, value } => {
            gx::write_bp(sys, register, value);
            if let Some(rec) = recorder {
                rec.push(Op::Bp { register, value });
            }
        }
        Command::SetXf { start, values } => {
            let values = values
                .chunks_exact(4)
                .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
                .collect::<Vec<_>>();

            xform::write_block(sys, start, &values);
            if let Some(rec) = recorder {
                rec.push(Op::Xf {
                    start,
                    values: values.into_boxed_slice(),
                });
            }
        }
        Command::IndexedSetXf {
            array,
            base,
            length,
            index,
        } => {
            let (addr, values) = xform::read_indexed(sys, array, index, length);
            xform::write_block(sys, base, &values);
            if let Some(rec) = recorder {
                rec.snapshot_words(addr, &values);
                rec.push(Op::Xf {
                    start: base,
                    values: values.into_boxed_slice(),
                });
            }
        }
        Command::Call { address, length } => {
            if let Some(rec) = recorder.as_deref_mut() {
                rec.mark_uncachable();
            }

            dlist::call(sys, address, length)?;
        }
        Command::Draw {
            topology,
            vat,
            count,
            data,
        } => {
            let mem = sys.modules.mem.clone();
            match recorder {
                Some(rec) => {
                    let mut touched = vertex::Touched::default();
                    vertex::draw(sys, topology, vat, count, data, mem.as_ref(), Some(&mut touched));
                    rec.snapshot_touched(mem.as_ref(), &touched);
                    rec.push(Op::Draw {
                        topology,
                        vat,
                        count,
                        data: data.into(),
                    });
                }
                None => vertex::draw(sys, topology, vat, count, data, mem.as_ref(), None),
            }
        }
    }

    Ok(())
}

/// Sets the value of an internal command processor register.
pub fn set_register(sys: &mut System, register: u8, value: u32) {
    let Some(reg) = Reg::from_repr(register) else {
        tracing::warn!("write to unknown CP register 0x{register:02X}: 0x{value:08X}");
        return;
    };

    let cp = &mut sys.gpu.cmd;
    match reg {
        Reg::Unknown00 | Reg::Unknown10 | Reg::Unknown20 => {
            tracing::trace!("ignored write to {reg:?}: 0x{value:08X}");
        }
        Reg::MatIndexLow | Reg::MatIndexHigh => {
            let index = (reg == Reg::MatIndexHigh) as usize;
            cp.mat_index[index] = value;
            let reg = if index == 0 {
                xform::Reg::MatIndexLow
            } else {
                xform::Reg::MatIndexHigh
            };

            xform::set_register(sys, reg, value);
        }
        Reg::VcdLow | Reg::VcdHigh => {
            let old = cp.vertex_descriptor.to_bits();
            let new = if reg == Reg::VcdLow {
                old.with_bits(0, 32, value as u64)
            } else {
                old.with_bits(32, 64, value as u64)
            };

            if old != new {
                vertex::flush(sys);
                sys.gpu.cmd.vertex_descriptor = VertexDescriptor::from_bits(new);
                sys.loaders.mark_all_dirty();
            }
        }
        _ if reg.is_vat() => {
            let index = (register & 0x7) as usize;
            let table = &mut cp.vertex_attr_tables[index];
            let changed = match register & 0xF0 {
                0x70 => table.a.to_bits() != value,
                0x80 => table.b.to_bits() != value,
                _ => table.c.to_bits() != value,
            };

            if changed {
                vertex::flush(sys);
                let table = &mut sys.gpu.cmd.vertex_attr_tables[index];
                match register & 0xF0 {
                    0x70 => table.a = attributes::VertexAttributeTableA::from_bits(value),
                    0x80 => table.b = attributes::VertexAttributeTableB::from_bits(value),
                    _ => table.c = attributes::VertexAttributeTableC::from_bits(value),
                }

                sys.loaders.mark_dirty(index as u8);
            }
        }
        _ if reg.is_array_base() => {
            cp.arrays[(register & 0xF) as usize].address = Address(value & PHYSICAL_MASK);
        }
        _ if reg.is_array_stride() => {
            cp.arrays[(register & 0xF) as usize].stride = value & 0xFF;
        }
        _ => tracing::warn!("unimplemented write to internal CP register {reg:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{StreamBuilder, system};

    #[test]
    fn partial_commands_are_not_consumed() {
        let mut sys = system();
        let stream = StreamBuilder::new().set_cp(0x50, 0x0000_0200).build();

        for len in 0..stream.len() {
            assert_eq!(read_command(&mut sys, &stream[..len]), Ok(None));
        }

        let (command, size) = read_command(&mut sys, &stream).unwrap().unwrap();
        assert_eq!(size, 6);
        assert_eq!(
            command,
            Command::SetCp {
                register: 0x50,
                value: 0x200
            }
        );
    }

    #[test]
    fn command_sizes() {
        let mut sys = system();
        let stream = StreamBuilder::new()
            .nop()
            .set_bp(0x40, 0x17)
            .set_xf(0x1008, &[1, 2, 3])
            .indexed_xf(0, 0x10, 4, 2)
            .call(Address(0x1000), 0x40)
            .build();

        let mut sizes = Vec::new();
        let mut offset = 0;
        while let Some((_, size)) = read_command(&mut sys, &stream[offset..]).unwrap() {
            sizes.push(size);
            offset += size;
        }

        assert_eq!(sizes, [1, 5, 17, 5, 9]);
    }

    #[test]
    fn draw_size_follows_vertex_format() {
        let mut sys = system();
        // direct position, vec3 f32
        set_register(&mut sys, 0x50, 0x0000_0200);
        set_register(&mut sys, 0x70, 0x0000_0009);

        let draw = StreamBuilder::new()
            .draw(Topology::TriangleStrip, 0, 4, &[0; 48])
            .build();
        assert_eq!(draw.len(), 3 + 48);

        assert_eq!(read_command(&mut sys, &draw[..50]), Ok(None));
        let (command, size) = read_command(&mut sys, &draw).unwrap().unwrap();
        assert_eq!(size, 51);
        assert!(matches!(command, Command::Draw { count: 4, .. }));
    }

    #[test]
    fn unknown_opcode_desyncs() {
        let mut sys = system();
        assert_eq!(
            read_command(&mut sys, &[0x18, 0, 0, 0]),
            Err(DesyncError::UnknownOpcode(0x18))
        );
        assert_eq!(
            read_command(&mut sys, &[0xC0, 0, 0]),
            Err(DesyncError::UnknownOpcode(0xC0))
        );
    }

    #[test]
    fn vat_writes_only_flush_on_change() {
        let mut sys = system();
        set_register(&mut sys, 0x50, 0x0000_0200);
        set_register(&mut sys, 0x70, 0x0000_0009);
        sys.loaders.get(&sys.gpu.cmd, 0, &mut sys.stats);
        sys.loaders.get(&sys.gpu.cmd, 2, &mut sys.stats);
        let dirty = sys.loaders.dirty();
        assert_eq!(dirty & 0b101, 0);

        set_register(&mut sys, 0x70, 0x0000_0009);
        assert_eq!(sys.loaders.dirty(), dirty);

        set_register(&mut sys, 0x72, 0x0000_0001);
        assert_eq!(sys.loaders.dirty(), dirty | 0b100);

        set_register(&mut sys, 0xA4, 0xC000_1234);
        set_register(&mut sys, 0xB4, 0x0000_0108);
        assert_eq!(sys.gpu.cmd.array(ArraySlot::Tex0).address, Address(0x1234));
        assert_eq!(sys.gpu.cmd.array(ArraySlot::Tex0).stride, 0x08);
    }
}

use bitos::integer::u5;

use super::*;
use crate::modules::memory::Ram;
use crate::system::gx::cmd::attributes::{
    AttributeMode, ColorDescriptor, ColorKind, NormalDescriptor, PositionDescriptor,
    TexCoordsDescriptor,
};

fn floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn be_floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

struct Harness {
    ram: Ram,
    arrays: [ArrayDescriptor; 16],
}

impl Harness {
    fn new() -> Self {
        Self {
            ram: Ram::new(0x1000),
            arrays: [ArrayDescriptor::default(); 16],
        }
    }

    fn array(&mut self, slot: ArraySlot, address: u32, stride: u32) {
        self.arrays[slot as usize] = ArrayDescriptor {
            address: Address(address),
            stride,
        };
    }

    fn decode(
        &self,
        vcd: VertexDescriptor,
        vat: VertexAttributeTable,
        raw: &[u8],
        count: usize,
    ) -> (VertexLoader, Vec<u8>, Touched) {
        let loader = VertexLoader::new(Uid::new(&vcd, &vat));
        let inputs = Inputs {
            arrays: &self.arrays,
            scales: vat.scales(),
            mem: &self.ram,
        };

        let mut out = Vec::new();
        let mut touched = Touched::default();
        let consumed = loader.decode(&inputs, raw, count, &mut out, Some(&mut touched));
        assert_eq!(consumed, raw.len());
        assert_eq!(out.len(), count * loader.format().stride as usize);

        (loader, out, touched)
    }
}

#[test]
fn basic() {
    let pos = PositionDescriptor::default()
        .with_kind(PositionKind::Vec3)
        .with_format(CoordsFormat::I16)
        .with_shift(u5::new(8));

    let chan0 = ColorDescriptor::default()
        .with_kind(ColorKind::Rgba)
        .with_format(ColorFormat::Rgb565);

    let vcd = VertexDescriptor::default()
        .with_position(AttributeMode::Direct)
        .with_chan0(AttributeMode::Direct);

    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_position(pos)
            .with_chan0(chan0),
        ..Default::default()
    };

    let raw = [
        0x01, 0x00, 0xFF, 0x00, 0x00, 0x80, 0xF8, 0x00, //
        0x00, 0x00, 0x00, 0x40, 0x02, 0x00, 0x07, 0xE0,
    ];

    let (loader, out, touched) = Harness::new().decode(vcd, vat, &raw, 2);
    assert_eq!(loader.vertex_size(), 8);
    assert_eq!(loader.format().stride, 16);
    assert_eq!(
        loader.format().position,
        Some(NativeAttribute {
            offset: 0,
            components: 3
        })
    );
    assert_eq!(
        loader.format().colors[0],
        Some(NativeAttribute {
            offset: 12,
            components: 4
        })
    );

    assert_eq!(floats(&out[0..12]), [1.0, -1.0, 0.5]);
    assert_eq!(out[12..16], [0xFF, 0x00, 0x00, 0xFF]);
    assert_eq!(floats(&out[16..28]), [0.0, 0.25, 2.0]);
    assert_eq!(out[28..32], [0x00, 0xFF, 0x00, 0xFF]);
    assert!(touched.is_empty());
}

#[test]
fn indexed_attributes() {
    let mut harness = Harness::new();
    harness.array(ArraySlot::Position, 0x100, 8);
    harness.array(ArraySlot::Chan1, 0x200, 4);
    harness.ram.write(Address(0x100), &be_floats(&[-1.0, -2.0]));
    harness.ram.write(Address(0x110), &be_floats(&[3.0, 4.0]));
    harness.ram.write(Address(0x204), &[1, 2, 3, 4]);

    let vcd = VertexDescriptor::default()
        .with_position(AttributeMode::Index16)
        .with_chan1(AttributeMode::Index8);

    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_position(
                PositionDescriptor::default()
                    .with_kind(PositionKind::Vec2)
                    .with_format(CoordsFormat::F32),
            )
            .with_chan1(
                ColorDescriptor::default()
                    .with_kind(ColorKind::Rgba)
                    .with_format(ColorFormat::Rgba8888),
            ),
        ..Default::default()
    };

    let raw = [0x00, 0x02, 0x01, 0x00, 0x00, 0x01];
    let (loader, out, touched) = harness.decode(vcd, vat, &raw, 2);
    assert_eq!(loader.vertex_size(), 3);
    assert_eq!(loader.format().stride, 12);
    assert_eq!(loader.format().colors[0], None);
    assert!(loader.format().colors[1].is_some());

    assert_eq!(floats(&out[0..8]), [3.0, 4.0]);
    assert_eq!(out[8..12], [1, 2, 3, 4]);
    assert_eq!(floats(&out[12..20]), [-1.0, -2.0]);
    assert_eq!(out[20..24], [1, 2, 3, 4]);

    let windows = touched.windows().collect::<Vec<_>>();
    assert_eq!(windows, [(Address(0x100), 0x18), (Address(0x204), 4)]);
}

#[test]
fn nbt_with_three_indices() {
    let mut harness = Harness::new();
    harness.array(ArraySlot::Normal, 0x300, 18);
    harness.ram.write(Address(0x300), &[0x40, 0x00, 0, 0, 0, 0]);
    harness.ram.write(Address(0x318), &[0, 0, 0x40, 0x00, 0, 0]);
    harness.ram.write(Address(0x330), &[0, 0, 0, 0, 0xC0, 0x00]);

    let vcd = VertexDescriptor::default().with_normal(AttributeMode::Index8);
    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_normal(
                NormalDescriptor::default()
                    .with_kind(NormalKind::N9)
                    .with_format(CoordsFormat::I16),
            )
            .with_normal_index3(true),
        ..Default::default()
    };

    let (loader, out, _) = harness.decode(vcd, vat, &[0, 1, 2], 1);
    assert_eq!(loader.vertex_size(), 3);
    assert_eq!(loader.format().stride, 36);
    assert_eq!(
        floats(&out),
        [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0]
    );
}

#[test]
fn unmapped_arrays_read_as_zero() {
    let mut harness = Harness::new();
    harness.array(ArraySlot::Position, 0x0100_0000, 12);

    let vcd = VertexDescriptor::default().with_position(AttributeMode::Index8);
    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default().with_position(
            PositionDescriptor::default()
                .with_kind(PositionKind::Vec3)
                .with_format(CoordsFormat::F32),
        ),
        ..Default::default()
    };

    let (_, out, _) = harness.decode(vcd, vat, &[3], 1);
    assert_eq!(floats(&out), [0.0; 3]);
}

#[test]
fn matrix_indices_layout() {
    let vcd = VertexDescriptor::default()
        .with_pos_mat_index(true)
        .with_tex_coord_mat_index([false, true, false, false, false, false, false, false])
        .with_position(AttributeMode::Direct)
        .with_chan0(AttributeMode::Index8)
        .with_tex_coord([
            AttributeMode::None,
            AttributeMode::Direct,
            AttributeMode::None,
            AttributeMode::None,
            AttributeMode::None,
            AttributeMode::None,
            AttributeMode::None,
            AttributeMode::None,
        ]);

    let tex = TexCoordsDescriptor::default()
        .with_kind(TexCoordsKind::Vec2)
        .with_format(CoordsFormat::I16)
        .with_shift(u5::new(1));

    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_position(
                PositionDescriptor::default()
                    .with_kind(PositionKind::Vec3)
                    .with_format(CoordsFormat::F32),
            )
            .with_chan0(
                ColorDescriptor::default()
                    .with_kind(ColorKind::Rgba)
                    .with_format(ColorFormat::Rgba8888),
            ),
        b: VertexAttributeTableB::default().with_tex1to3([tex, Default::default(), Default::default()]),
        ..Default::default()
    };

    let mut harness = Harness::new();
    harness.array(ArraySlot::Chan0, 0x400, 4);
    harness.ram.write(Address(0x400), &[9, 8, 7, 6]);

    let mut raw = vec![0x85, 30];
    raw.extend(be_floats(&[1.0, 2.0, 3.0]));
    raw.extend([0, 0x00, 0x08, 0xFF, 0xFC]);

    let (loader, out, _) = harness.decode(vcd, vat, &raw, 1);
    insta::assert_debug_snapshot!(loader.steps(), @r"
    [
        PosMatrixIndex,
        TexMatrixIndex(
            1,
        ),
        Position {
            source: Direct,
            format: F32,
            components: 3,
        },
        Color {
            source: Index8(
                Chan0,
            ),
            format: Rgba8888,
        },
        SkipTexCoord,
        TexCoord {
            source: Direct,
            format: I16,
            components: 2,
            with_matrix: true,
        },
        PosMatrixWriteBack,
    ]
    ");

    let format = loader.format();
    assert_eq!(loader.vertex_size(), 2 + 12 + 1 + 4);
    assert_eq!(format.stride, 12 + 4 + 12 + 4);
    assert_eq!(format.tex_coords[0], None);
    assert_eq!(
        format.tex_coords[1],
        Some(NativeAttribute {
            offset: 16,
            components: 3
        })
    );
    assert_eq!(format.pos_matrix, Some(28));

    assert_eq!(floats(&out[0..12]), [1.0, 2.0, 3.0]);
    assert_eq!(out[12..16], [9, 8, 7, 6]);
    assert_eq!(floats(&out[16..28]), [4.0, -2.0, 30.0]);
    assert_eq!(out[28..32], 5u32.to_ne_bytes());
}

#[test]
fn direct_all_components() {
    let f32x2 = TexCoordsDescriptor::default()
        .with_kind(TexCoordsKind::Vec2)
        .with_format(CoordsFormat::F32);
    let rgba = ColorDescriptor::default()
        .with_kind(ColorKind::Rgba)
        .with_format(ColorFormat::Rgba8888);

    let vcd = VertexDescriptor::default()
        .with_pos_mat_index(true)
        .with_tex_coord_mat_index([true; 8])
        .with_position(AttributeMode::Direct)
        .with_normal(AttributeMode::Direct)
        .with_chan0(AttributeMode::Direct)
        .with_chan1(AttributeMode::Direct)
        .with_tex_coord([AttributeMode::Direct; 8]);

    let vat = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_position(
                PositionDescriptor::default()
                    .with_kind(PositionKind::Vec3)
                    .with_format(CoordsFormat::F32),
            )
            .with_normal(
                NormalDescriptor::default()
                    .with_kind(NormalKind::N9)
                    .with_format(CoordsFormat::F32),
            )
            .with_chan0(rgba)
            .with_chan1(rgba)
            .with_tex0(f32x2),
        b: VertexAttributeTableB::default()
            .with_tex1to3([f32x2; 3])
            .with_tex4_kind(TexCoordsKind::Vec2)
            .with_tex4_format(CoordsFormat::F32),
        c: VertexAttributeTableC::default().with_tex5to7([f32x2; 3]),
    };

    let mut raw = vec![20, 0, 1, 2, 3, 4, 5, 6, 7];
    raw.extend(be_floats(&[-1.0, -2.0, -3.0]));
    raw.extend(be_floats(&[
        -4.0, -5.0, -6.0, -7.0, -8.0, -9.0, -10.0, -11.0, -12.0,
    ]));
    raw.extend([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);
    let coords = (0..8)
        .flat_map(|i| [i as f32 + 0.1, -(i as f32) - 0.9])
        .collect::<Vec<_>>();
    raw.extend(be_floats(&coords));

    let (loader, out, _) = Harness::new().decode(vcd, vat, &raw, 1);
    let format = loader.format();
    assert_eq!(loader.vertex_size(), 129);
    assert_eq!(format.stride, 39 * 4);

    assert_eq!(
        format.position,
        Some(NativeAttribute {
            offset: 0,
            components: 3
        })
    );
    assert_eq!(floats(&out[0..12]), [-1.0, -2.0, -3.0]);

    assert_eq!(
        format.normals,
        Some(NativeAttribute {
            offset: 12,
            components: 9
        })
    );
    assert_eq!(
        floats(&out[12..48]),
        [-4.0, -5.0, -6.0, -7.0, -8.0, -9.0, -10.0, -11.0, -12.0]
    );

    assert_eq!(format.colors.map(|c| c.map(|c| c.offset)), [Some(48), Some(52)]);
    assert_eq!(out[48..56], [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);

    for i in 0..8 {
        let offset = 56 + 12 * i as u32;
        assert_eq!(
            format.tex_coords[i],
            Some(NativeAttribute {
                offset,
                components: 3
            })
        );

        let at = offset as usize;
        assert_eq!(
            floats(&out[at..at + 12]),
            [coords[2 * i], coords[2 * i + 1], i as f32]
        );
    }

    assert_eq!(format.pos_matrix, Some(152));
    assert_eq!(out[152..156], 20u32.to_ne_bytes());
}

#[test]
fn uid_ignores_fractions_and_absent_attributes() {
    let vcd = VertexDescriptor::default().with_position(AttributeMode::Direct);
    let pos = PositionDescriptor::default()
        .with_kind(PositionKind::Vec3)
        .with_format(CoordsFormat::I16);

    let a = VertexAttributeTable {
        a: VertexAttributeTableA::default().with_position(pos.with_shift(u5::new(3))),
        ..Default::default()
    };

    let b = VertexAttributeTable {
        a: VertexAttributeTableA::default()
            .with_position(pos.with_shift(u5::new(12)))
            .with_chan1(ColorDescriptor::default().with_format(ColorFormat::Rgba6666)),
        c: VertexAttributeTableC::default().with_tex4_shift(u5::new(7)),
        ..Default::default()
    };

    assert_eq!(Uid::new(&vcd, &a), Uid::new(&vcd, &b));

    let c = VertexAttributeTable {
        a: VertexAttributeTableA::default().with_position(pos.with_format(CoordsFormat::U16)),
        ..Default::default()
    };
    assert_ne!(Uid::new(&vcd, &a), Uid::new(&vcd, &c));
}

#[test]
fn cache_shares_loaders_between_groups() {
    let mut cmd = cmd::Interface::default();
    let mut stats = Stats::default();
    let mut cache = Cache::default();

    cmd.vertex_descriptor = VertexDescriptor::default().with_position(AttributeMode::Direct);
    let pos = PositionDescriptor::default().with_kind(PositionKind::Vec3);
    cmd.vertex_attr_tables[0].a = VertexAttributeTableA::default().with_position(pos);
    cmd.vertex_attr_tables[3].a =
        VertexAttributeTableA::default().with_position(pos.with_shift(u5::new(4)));

    let first = cache.get(&cmd, 0, &mut stats);
    let second = cache.get(&cmd, 3, &mut stats);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(stats.loaders_built, 1);
    assert_eq!(cache.dirty(), 0b1111_0110);

    cmd.vertex_attr_tables[3].a = VertexAttributeTableA::default()
        .with_position(pos.with_format(CoordsFormat::F32));
    cache.mark_dirty(3);
    let third = cache.get(&cmd, 3, &mut stats);
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(stats.loaders_built, 2);
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.dirty(), 0xFF);
}

//! Primitive index generation.
//!
//! Converts primitives into triangle, line and point index lists over a shared vertex buffer.
//! Triangles are either plain lists or, with primitive restart, strips separated by
//! [`RESTART`].
use crate::system::gx::{PrimitiveClass, Topology};

/// The primitive restart sentinel.
pub const RESTART: u16 = 0xFFFF;
/// The highest index real vertices can have.
pub const MAX_INDEX: u16 = RESTART - 1;

#[derive(Debug, Clone, Default)]
pub struct IndexGenerator {
    primitive_restart: bool,
    /// Index of the next vertex.
    pub base: u16,
    pub triangles: Vec<u16>,
    pub lines: Vec<u16>,
    pub points: Vec<u16>,
}

impl IndexGenerator {
    pub fn new(primitive_restart: bool) -> Self {
        Self {
            primitive_restart,
            ..Default::default()
        }
    }

    pub fn primitive_restart(&self) -> bool {
        self.primitive_restart
    }

    /// How many more vertices can be indexed before [`MAX_INDEX`] is exceeded.
    pub fn remaining_capacity(&self) -> u32 {
        RESTART as u32 - self.base as u32
    }

    /// Number of indices currently in the list of the given class.
    pub fn len(&self, class: PrimitiveClass) -> usize {
        match class {
            PrimitiveClass::Triangles => self.triangles.len(),
            PrimitiveClass::Lines => self.lines.len(),
            PrimitiveClass::Points => self.points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.lines.is_empty() && self.points.is_empty()
    }

    /// The number of indices a primitive with `count` vertices produces.
    pub fn max_indices(topology: Topology, count: u32, primitive_restart: bool) -> u32 {
        let triangles = |n: u32| n.saturating_sub(2);
        match (topology, primitive_restart) {
            (Topology::QuadList | Topology::QuadList2, false) => {
                6 * (count / 4) + 3 * (count % 4 == 3) as u32
            }
            (Topology::QuadList | Topology::QuadList2, true) => {
                5 * (count / 4) + 4 * (count % 4 == 3) as u32
            }
            (Topology::TriangleList, false) => 3 * (count / 3),
            (Topology::TriangleList, true) => 4 * (count / 3),
            (Topology::TriangleStrip | Topology::TriangleFan, false) => 3 * triangles(count),
            (Topology::TriangleStrip, true) => {
                if count >= 3 {
                    count + 1
                } else {
                    0
                }
            }
            (Topology::TriangleFan, true) => {
                let n = triangles(count);
                let rest = match n % 3 {
                    0 => 0,
                    1 => 4,
                    _ => 5,
                };

                6 * (n / 3) + rest
            }
            (Topology::LineList, _) => 2 * (count / 2),
            (Topology::LineStrip, _) => 2 * count.saturating_sub(1),
            (Topology::PointList, _) => count,
        }
    }

    /// Appends the indices of a primitive with `count` vertices starting at the current base,
    /// then advances the base past them.
    ///
    /// The caller must ensure `count <= self.remaining_capacity()`.
    pub fn add(&mut self, topology: Topology, count: u32) {
        debug_assert!(count <= self.remaining_capacity());

        let base = self.base as u32;
        let pr = self.primitive_restart;
        match topology {
            Topology::QuadList | Topology::QuadList2 => self.add_quads(base, count, pr),
            Topology::TriangleList => self.add_list(base, count, pr),
            Topology::TriangleStrip => self.add_strip(base, count, pr),
            Topology::TriangleFan => self.add_fan(base, count, pr),
            Topology::LineList => {
                for i in (1..count).step_by(2) {
                    self.lines
                        .extend_from_slice(&[(base + i - 1) as u16, (base + i) as u16]);
                }
            }
            Topology::LineStrip => {
                for i in 1..count {
                    self.lines
                        .extend_from_slice(&[(base + i - 1) as u16, (base + i) as u16]);
                }
            }
            Topology::PointList => self
                .points
                .extend((base..base + count).map(|i| i as u16)),
        }

        self.base = (base + count) as u16;
    }

    #[inline(always)]
    fn triangle(&mut self, a: u32, b: u32, c: u32, pr: bool) {
        self.triangles
            .extend_from_slice(&[a as u16, b as u16, c as u16]);
        if pr {
            self.triangles.push(RESTART);
        }
    }

    #[inline(always)]
    fn run(&mut self, indices: &[u32]) {
        self.triangles.extend(indices.iter().map(|&i| i as u16));
        self.triangles.push(RESTART);
    }

    fn add_quads(&mut self, base: u32, count: u32, pr: bool) {
        for i in (3..count).step_by(4) {
            let i = base + i;
            if pr {
                self.run(&[i - 2, i - 1, i - 3, i]);
            } else {
                self.triangle(i - 3, i - 2, i - 1, false);
                self.triangle(i - 3, i - 1, i, false);
            }
        }

        if count % 4 == 3 {
            let i = base + count - 1;
            self.triangle(i - 2, i - 1, i, pr);
        }
    }

    fn add_list(&mut self, base: u32, count: u32, pr: bool) {
        for i in (2..count).step_by(3) {
            let i = base + i;
            self.triangle(i - 2, i - 1, i, pr);
        }
    }

    fn add_strip(&mut self, base: u32, count: u32, pr: bool) {
        if count < 3 {
            return;
        }

        if pr {
            self.triangles
                .extend((base..base + count).map(|i| i as u16));
            self.triangles.push(RESTART);
            return;
        }

        // odd triangles are flipped to keep a consistent winding
        for (k, i) in (2..count).enumerate() {
            let i = base + i;
            if k.is_multiple_of(2) {
                self.triangle(i - 2, i - 1, i, false);
            } else {
                self.triangle(i - 2, i, i - 1, false);
            }
        }
    }

    fn add_fan(&mut self, base: u32, count: u32, pr: bool) {
        if !pr {
            for i in 2..count {
                self.triangle(base, base + i - 1, base + i, false);
            }

            return;
        }

        // as strips: three fan triangles fit in a five index run
        let mut i = 2;
        while i + 2 < count {
            let v = base + i;
            self.run(&[v - 1, v, base, v + 1, v + 2]);
            i += 3;
        }

        if i + 1 < count {
            let v = base + i;
            self.run(&[v - 1, v, base, v + 1]);
            i += 2;
        }

        if i < count {
            let v = base + i;
            self.run(&[v - 1, v, base]);
        }
    }

    /// Clears every list and resets the base.
    pub fn reset(&mut self) {
        self.base = 0;
        self.triangles.clear();
        self.lines.clear();
        self.points.clear();
    }
}

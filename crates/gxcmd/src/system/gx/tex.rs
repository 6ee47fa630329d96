//! Texture unit (TX).
use bitos::bitos;
use bitos::integer::{u2, u10, u11, u15};

use crate::Address;
use crate::modules::memory::MemoryModule;
use crate::modules::render;
use crate::system::System;
use crate::system::gx::Reg;

/// Size of texture memory.
pub const TMEM_SIZE: usize = 1024 * 1024;
/// Size of a texture memory line, the unit of preloads and TLUT loads.
pub const TMEM_LINE_SIZE: usize = 32;

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClutFormat {
    #[default]
    IA8       = 0b00,
    RGB565    = 0b01,
    RGB5A3    = 0b10,
    Reserved0 = 0b11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ClutLoad {
    #[bits(0..10)]
    pub tmem_offset: u10,
    /// Number of 16 entry groups to load.
    #[bits(10..21)]
    pub count: u11,
}

impl ClutLoad {
    /// Destination of the load, in bytes from the start of TMEM.
    pub fn tmem_addr(&self) -> usize {
        (self.tmem_offset().value() as usize) << 9
    }

    /// Length of the load in bytes.
    pub fn length(&self) -> usize {
        self.count().value() as usize * TMEM_LINE_SIZE
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ClutRef {
    #[bits(0..10)]
    pub tmem_offset: u10,
    #[bits(10..12)]
    pub format: ClutFormat,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadMode {
    /// Number of lines (or line pairs, for interleaved preloads) to copy.
    #[bits(0..15)]
    pub count: u15,
    /// Type 3 interleaves 32-byte lines between the even and odd banks.
    #[bits(15..17)]
    pub kind: u2,
}

impl PreloadMode {
    pub fn is_interleaved(&self) -> bool {
        self.kind().value() == 3
    }
}

/// Texture unit state that isn't stored in bank A.
pub struct Interface {
    /// Texture memory.
    pub tmem: Box<[u8]>,
    /// Texture maps whose configuration changed since the last flush, one bit per map.
    pub dirty: u8,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            tmem: vec![0; TMEM_SIZE].into_boxed_slice(),
            dirty: 0,
        }
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("dirty", &format_args!("{:08b}", self.dirty))
            .finish_non_exhaustive()
    }
}

impl Interface {
    pub fn mark_dirty(&mut self, map: u8) {
        self.dirty |= 1 << map;
    }

    /// Copies `len` bytes from memory at `src` into TMEM at `offset`, clamped to the end of TMEM.
    /// Returns how many bytes were actually loaded.
    fn load(&mut self, mem: &dyn MemoryModule, src: Address, offset: usize, len: usize) -> usize {
        let len = len.min(TMEM_SIZE.saturating_sub(offset));
        let Some(dst) = self.tmem.get_mut(offset..offset + len) else {
            return 0;
        };

        if !mem.read(src, dst) {
            tracing::warn!("texture memory load from unmapped address {src}");
            dst.fill(0);
        }

        len
    }
}

/// Loads a TLUT from memory into TMEM.
pub fn load_tlut(sys: &mut System) {
    let load = ClutLoad::from_bits(sys.gpu.bp[Reg::TexLutLoad as usize]);
    let src = Address((sys.gpu.bp[Reg::TexLutAddress as usize] << 5) & 0x01FF_FFFF);
    let offset = load.tmem_addr();
    let len = load.length();

    if offset + len > TMEM_SIZE {
        tracing::warn!(offset, len, "tlut load out of texture memory bounds");
        return;
    }

    let mem = sys.modules.mem.clone();
    let loaded = sys.gpu.tex.load(mem.as_ref(), src, offset, len);
    tracing::trace!("loaded tlut of {loaded} bytes from {src} into tmem 0x{offset:05X}");

    sys.modules.render.exec(render::Action::LoadTmem {
        offset: offset as u32,
        length: loaded as u32,
    });
}

/// Preloads texture data from memory into TMEM.
pub fn preload(sys: &mut System) {
    let mode = PreloadMode::from_bits(sys.gpu.bp[Reg::TexLoadBlock3 as usize]);
    let src = Address(sys.gpu.bp[Reg::TexLoadBlock0 as usize] << 5);
    let even = sys.gpu.bp[Reg::TexLoadBlock1 as usize] as usize * TMEM_LINE_SIZE;
    let odd = sys.gpu.bp[Reg::TexLoadBlock2 as usize] as usize * TMEM_LINE_SIZE;
    let count = mode.count().value() as usize;
    let mem = sys.modules.mem.clone();

    let (offset, length) = if mode.is_interleaved() {
        let mut lines = 0;
        for i in 0..count {
            let even_addr = even + i * TMEM_LINE_SIZE;
            let odd_addr = odd + i * TMEM_LINE_SIZE;
            if even_addr + TMEM_LINE_SIZE > TMEM_SIZE || odd_addr + TMEM_LINE_SIZE > TMEM_SIZE {
                break;
            }

            let line = src + (2 * i * TMEM_LINE_SIZE) as u32;
            sys.gpu.tex.load(mem.as_ref(), line, even_addr, TMEM_LINE_SIZE);
            sys.gpu.tex.load(
                mem.as_ref(),
                line + TMEM_LINE_SIZE as u32,
                odd_addr,
                TMEM_LINE_SIZE,
            );
            lines += 1;
        }

        let start = even.min(odd);
        let end = (even.max(odd) + lines * TMEM_LINE_SIZE).min(TMEM_SIZE);
        (start, end.saturating_sub(start))
    } else {
        let loaded = sys
            .gpu
            .tex
            .load(mem.as_ref(), src, even, count * TMEM_LINE_SIZE);
        (even, loaded)
    };

    tracing::trace!(?mode, "preloaded {length} bytes from {src} into tmem 0x{offset:05X}");
    sys.modules.render.exec(render::Action::LoadTmem {
        offset: offset as u32,
        length: length as u32,
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clut_load_geometry() {
        let load = ClutLoad::from_bits((4 << 10) | 0x3);
        assert_eq!(load.tmem_addr(), 0x600);
        assert_eq!(load.length(), 128);
    }

    #[test]
    fn preload_kind() {
        let mode = PreloadMode::from_bits((3 << 15) | 16);
        assert!(mode.is_interleaved());
        assert_eq!(mode.count().value(), 16);
    }
}

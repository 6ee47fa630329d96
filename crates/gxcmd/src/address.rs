//! Physical addresses in emulated memory.
use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Sub};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Mask of the physical address bits the GPU actually decodes.
pub const PHYSICAL_MASK: u32 = 0x3FFF_FFFF;

/// A physical address in emulated memory.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Address(pub u32);

impl Address {
    #[inline(always)]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns this address with the bits the GPU ignores cleared.
    #[inline(always)]
    pub const fn physical(self) -> Self {
        Self(self.0 & PHYSICAL_MASK)
    }

    /// Returns this address aligned down to a 32 byte boundary.
    #[inline(always)]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !0x1F)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}_{:04X}", self.0 >> 16, self.0 & 0xFFFF)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Add<u32> for Address {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for Address {
    #[inline(always)]
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<Address> for Address {
    type Output = u32;

    #[inline(always)]
    fn sub(self, rhs: Address) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl From<u32> for Address {
    #[inline(always)]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

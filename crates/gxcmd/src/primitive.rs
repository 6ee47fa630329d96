//! Primitive numeric types that can be moved in and out of byte buffers.

/// A primitive numeric type with a fixed byte representation.
pub trait Primitive: Copy + Default + Send + Sync + 'static {
    /// Reads a value from the start of `bytes`, interpreted as big-endian.
    fn read_be_bytes(bytes: &[u8]) -> Self;

    /// Reads a value from the start of `bytes`, interpreted as native-endian.
    fn read_ne_bytes(bytes: &[u8]) -> Self;

    /// Writes this value to the start of `bytes` as big-endian.
    fn write_be_bytes(self, bytes: &mut [u8]);

    /// Writes this value to the start of `bytes` as native-endian.
    fn write_ne_bytes(self, bytes: &mut [u8]);
}

macro_rules! impl_primitive {
    ($($ty:ty),*) => {
        $(
            impl Primitive for $ty {
                #[inline(always)]
                fn read_be_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0; size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..size_of::<$ty>()]);
                    <$ty>::from_be_bytes(buf)
                }

                #[inline(always)]
                fn read_ne_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0; size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..size_of::<$ty>()]);
                    <$ty>::from_ne_bytes(buf)
                }

                #[inline(always)]
                fn write_be_bytes(self, bytes: &mut [u8]) {
                    bytes[..size_of::<$ty>()].copy_from_slice(&self.to_be_bytes());
                }

                #[inline(always)]
                fn write_ne_bytes(self, bytes: &mut [u8]) {
                    bytes[..size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_round_trip() {
        let mut buf = [0; 4];
        0x1234_5678u32.write_be_bytes(&mut buf);
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(u16::read_be_bytes(&buf[2..]), 0x5678);
        assert_eq!(i8::read_be_bytes(&[0xFF]), -1);
    }
}

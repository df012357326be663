#![forbid(unsafe_code)]
//! Fixed-width encoders shared by the page layouts and the key codecs.

pub mod ord {
    //! Order-preserving encoders for integer keys.
    //!
    //! Encoded values compare with `memcmp` order equal to the numeric order:
    //! unsigned values are stored big-endian, signed values additionally have
    //! their sign bit flipped.

    macro_rules! unsigned_be {
        ($ty:ty, $put:ident, $get:ident) => {
            #[doc = concat!("Writes `v` big-endian into the head of `dst`. Panics if `dst` is too short.")]
            pub fn $put(dst: &mut [u8], v: $ty) {
                const LEN: usize = core::mem::size_of::<$ty>();
                assert!(dst.len() >= LEN, "destination too small");
                dst[..LEN].copy_from_slice(&v.to_be_bytes());
            }

            #[doc = concat!("Reads a big-endian `", stringify!($ty), "` from the head of `src`. Panics if `src` is too short.")]
            pub fn $get(src: &[u8]) -> $ty {
                const LEN: usize = core::mem::size_of::<$ty>();
                let Some(head) = src.get(..LEN) else {
                    panic!(
                        "{} source shorter than {} bytes (have {})",
                        stringify!($ty),
                        LEN,
                        src.len()
                    );
                };
                let mut bytes = [0u8; LEN];
                bytes.copy_from_slice(head);
                <$ty>::from_be_bytes(bytes)
            }
        };
    }

    macro_rules! signed_be {
        ($ty:ty, $unsigned:ty, $put:ident, $get:ident, $put_raw:ident, $get_raw:ident) => {
            #[doc = concat!("Writes `v` so that encoded `", stringify!($ty), "` values sort numerically.")]
            pub fn $put(dst: &mut [u8], v: $ty) {
                $put_raw(dst, (v as $unsigned) ^ (1 << (<$unsigned>::BITS - 1)));
            }

            #[doc = concat!("Inverse of [`", stringify!($put), "`].")]
            pub fn $get(src: &[u8]) -> $ty {
                ($get_raw(src) ^ (1 << (<$unsigned>::BITS - 1))) as $ty
            }
        };
    }

    unsigned_be!(u32, put_u32_be, get_u32_be);
    unsigned_be!(u64, put_u64_be, get_u64_be);
    signed_be!(i32, u32, put_i32_be, get_i32_be, put_u32_be, get_u32_be);
    signed_be!(i64, u64, put_i64_be, get_i64_be, put_u64_be, get_u64_be);
}

pub mod int {
    //! 4-byte header integers used by the node page layouts.

    use super::ord;

    /// Width of every header integer.
    pub const INT_LEN: usize = 4;

    /// Reads the big-endian u32 stored at `off`.
    #[inline]
    pub fn read_u32(buf: &[u8], off: usize) -> u32 {
        ord::get_u32_be(&buf[off..off + INT_LEN])
    }

    /// Writes `value` big-endian at `off`.
    #[inline]
    pub fn write_u32(buf: &mut [u8], off: usize, value: u32) {
        ord::put_u32_be(&mut buf[off..off + INT_LEN], value);
    }

    /// Reads a header flag (any non-zero integer is `true`).
    #[inline]
    pub fn read_flag(buf: &[u8], off: usize) -> bool {
        read_u32(buf, off) != 0
    }

    /// Writes a header flag as `0` or `1`.
    #[inline]
    pub fn write_flag(buf: &mut [u8], off: usize, value: bool) {
        write_u32(buf, off, u32::from(value));
    }
}

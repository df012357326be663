use std::cmp::Ordering;

use crate::primitives::bytes::ord;
use crate::types::{Result, StrataError};

/// Key types storable in the tree.
///
/// Keys are fixed width and compared in encoded form, so every node can be
/// searched without decoding.
pub trait KeyCodec: Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode `key` into exactly [`Self::WIDTH`] bytes of `out`.
    fn encode_key(key: &Self, out: &mut [u8]);

    /// Compare two encoded keys.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Byte layout of an encoded value, for monoids that read values in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Plain big-endian unsigned integer.
    UnsignedBe,
    /// Big-endian with the sign bit flipped so encoded values sort numerically.
    SignedBe,
    /// Opaque bytes.
    Bytes,
}

/// Value types storable in the tree.
pub trait ValCodec: Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Layout of the encoded bytes.
    const ENCODING: ValueEncoding;

    /// Encode `value` into exactly [`Self::WIDTH`] bytes of `out`.
    fn encode_val(value: &Self, out: &mut [u8]);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

fn check_width(src: &[u8], width: usize) -> Result<()> {
    if src.len() < width {
        return Err(StrataError::Corruption("encoded field shorter than codec width"));
    }
    Ok(())
}

impl KeyCodec for u32 {
    const WIDTH: usize = 4;

    fn encode_key(key: &Self, out: &mut [u8]) {
        ord::put_u32_be(out, *key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        check_width(bytes, <Self as KeyCodec>::WIDTH)?;
        Ok(ord::get_u32_be(bytes))
    }
}

impl KeyCodec for u64 {
    const WIDTH: usize = 8;

    fn encode_key(key: &Self, out: &mut [u8]) {
        ord::put_u64_be(out, *key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        check_width(bytes, <Self as KeyCodec>::WIDTH)?;
        Ok(ord::get_u64_be(bytes))
    }
}

impl KeyCodec for i32 {
    const WIDTH: usize = 4;

    fn encode_key(key: &Self, out: &mut [u8]) {
        ord::put_i32_be(out, *key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        check_width(bytes, <Self as KeyCodec>::WIDTH)?;
        Ok(ord::get_i32_be(bytes))
    }
}

impl KeyCodec for i64 {
    const WIDTH: usize = 8;

    fn encode_key(key: &Self, out: &mut [u8]) {
        ord::put_i64_be(out, *key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        check_width(bytes, <Self as KeyCodec>::WIDTH)?;
        Ok(ord::get_i64_be(bytes))
    }
}

impl<const N: usize> KeyCodec for [u8; N] {
    const WIDTH: usize = N;

    fn encode_key(key: &Self, out: &mut [u8]) {
        out[..N].copy_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        check_width(bytes, N)?;
        let mut key = [0u8; N];
        key.copy_from_slice(&bytes[..N]);
        Ok(key)
    }
}

impl ValCodec for u32 {
    const WIDTH: usize = 4;
    const ENCODING: ValueEncoding = ValueEncoding::UnsignedBe;

    fn encode_val(value: &Self, out: &mut [u8]) {
        ord::put_u32_be(out, *value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        check_width(src, <Self as ValCodec>::WIDTH)?;
        Ok(ord::get_u32_be(src))
    }
}

impl ValCodec for u64 {
    const WIDTH: usize = 8;
    const ENCODING: ValueEncoding = ValueEncoding::UnsignedBe;

    fn encode_val(value: &Self, out: &mut [u8]) {
        ord::put_u64_be(out, *value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        check_width(src, <Self as ValCodec>::WIDTH)?;
        Ok(ord::get_u64_be(src))
    }
}

impl ValCodec for i64 {
    const WIDTH: usize = 8;
    const ENCODING: ValueEncoding = ValueEncoding::SignedBe;

    fn encode_val(value: &Self, out: &mut [u8]) {
        ord::put_i64_be(out, *value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        check_width(src, <Self as ValCodec>::WIDTH)?;
        Ok(ord::get_i64_be(src))
    }
}

impl<const N: usize> ValCodec for [u8; N] {
    const WIDTH: usize = N;
    const ENCODING: ValueEncoding = ValueEncoding::Bytes;

    fn encode_val(value: &Self, out: &mut [u8]) {
        out[..N].copy_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        check_width(src, N)?;
        let mut value = [0u8; N];
        value.copy_from_slice(&src[..N]);
        Ok(value)
    }
}

/// Encodes `key` into a freshly allocated buffer.
pub(crate) fn encoded_key<K: KeyCodec>(key: &K) -> Vec<u8> {
    let mut buf = vec![0u8; K::WIDTH];
    K::encode_key(key, &mut buf);
    buf
}

/// Encodes `value` into a freshly allocated buffer.
pub(crate) fn encoded_val<V: ValCodec>(value: &V) -> Vec<u8> {
    let mut buf = vec![0u8; V::WIDTH];
    V::encode_val(value, &mut buf);
    buf
}

//! Wire Codec
//!
//! Length-prefixed, little-endian framed encoding used by every packet.
//! Both ends of the protocol link this module, so the byte layout of any
//! value is identical on client and server.
//!
//! Contract:
//! - primitive integers: little-endian, fixed width
//! - floats: IEEE-754 native bit layout, little-endian
//! - enums: their underlying integer
//! - strings: u64 length prefix, then raw bytes
//! - fixed arrays of N: N elements back-to-back
//! - variable sequences: u64 length prefix, then elements
//! - tagged variants: u8 discriminator, then the payload of that alternative
//! - composite records: each declared field in declaration order
//!
//! The [`Reader`] is monadic: the first failure latches and every subsequent
//! read returns the same error without consuming bytes. [`WireError::TruncatedInput`]
//! doubles as the "need more bytes" signal for the framing layer, which keeps
//! accumulating input instead of treating it as a protocol violation.

use thiserror::Error;

/// Upper bound on any string or sequence length prefix. Anything larger is a
/// malformed or hostile frame, not a packet this protocol produces.
pub const MAX_WIRE_LEN: u64 = 64 * 1024;

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ended before the value did. At the framing boundary this
    /// means "need more bytes", not "drop the connection".
    #[error("truncated input")]
    TruncatedInput,

    /// An integer did not map to any enum value.
    #[error("bad enum value {value} for {type_name}")]
    BadEnum {
        /// Enum type being decoded.
        type_name: &'static str,
        /// Offending raw value.
        value: u64,
    },

    /// A variant discriminator was outside the declared alternative list.
    #[error("bad variant tag {tag} for {type_name}")]
    BadVariantTag {
        /// Variant type being decoded.
        type_name: &'static str,
        /// Offending tag byte.
        tag: u8,
    },

    /// A magic byte sequence did not match.
    #[error("magic mismatch")]
    MagicMismatch,

    /// A length prefix exceeded [`MAX_WIRE_LEN`].
    #[error("length {length} exceeds limit {limit}")]
    LengthExceedsLimit {
        /// Declared length.
        length: u64,
        /// The limit it broke.
        limit: u64,
    },
}

/// Values that know their own wire layout.
pub trait Wire: Sized {
    /// Append this value's encoding to the writer.
    fn encode(&self, w: &mut Writer);
    /// Decode one value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

// =============================================================================
// WRITER
// =============================================================================

/// Append-only encoder over a growable byte buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consume the writer, yielding the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a u16, little-endian.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a u32, little-endian.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a u64, little-endian.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an i8.
    pub fn put_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an i16, little-endian.
    pub fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an i32, little-endian.
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an i64, little-endian.
    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an f32 as its IEEE-754 bits, little-endian.
    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    /// Write an f64 as its IEEE-754 bits, little-endian.
    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    /// Write a bool as one byte (0 or 1).
    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    /// Write a string: u64 length prefix, then raw bytes.
    pub fn put_str(&mut self, s: &str) {
        self.put_u64(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Write raw bytes with no prefix (fixed-size array payloads, magic).
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a variable-length sequence: u64 length prefix, then elements.
    pub fn put_seq<T: Wire>(&mut self, items: &[T]) {
        self.put_u64(items.len() as u64);
        for item in items {
            item.encode(self);
        }
    }
}

// =============================================================================
// READER
// =============================================================================

/// Cursor-based decoder with a latching error state.
///
/// After the first failed read, every further read reports the same error
/// and consumes nothing; callers can decode a whole record straight through
/// and check once at the end, or bail early with `?`.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    latched: Option<WireError>,
}

impl<'a> Reader<'a> {
    /// Create a reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, latched: None }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The latched error, if any read has failed.
    pub fn error(&self) -> Option<&WireError> {
        self.latched.as_ref()
    }

    fn fail<T>(&mut self, err: WireError) -> Result<T, WireError> {
        self.latched = Some(err.clone());
        Err(err)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if let Some(err) = &self.latched {
            return Err(err.clone());
        }
        if self.remaining() < n {
            return self.fail(WireError::TruncatedInput);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian u16.
    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32.
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian u64.
    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read an i8.
    pub fn get_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.get_u8()? as i8)
    }

    /// Read a little-endian i16.
    pub fn get_i16(&mut self) -> Result<i16, WireError> {
        Ok(self.get_u16()? as i16)
    }

    /// Read a little-endian i32.
    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.get_u32()? as i32)
    }

    /// Read a little-endian i64.
    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        Ok(self.get_u64()? as i64)
    }

    /// Read an f32 from its IEEE-754 bits.
    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    /// Read an f64 from its IEEE-754 bits.
    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    /// Read a bool; any byte other than 0 or 1 is a bad enum.
    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => self.fail(WireError::BadEnum { type_name: "bool", value: v as u64 }),
        }
    }

    /// Read a length prefix, enforcing [`MAX_WIRE_LEN`].
    pub fn get_len(&mut self) -> Result<usize, WireError> {
        let len = self.get_u64()?;
        if len > MAX_WIRE_LEN {
            return self.fail(WireError::LengthExceedsLimit { length: len, limit: MAX_WIRE_LEN });
        }
        Ok(len as usize)
    }

    /// Read a string: u64 length prefix, then raw bytes (UTF-8 validated).
    pub fn get_string(&mut self) -> Result<String, WireError> {
        let len = self.get_len()?;
        let bytes = self.take(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => self.fail(WireError::BadEnum { type_name: "utf-8 string", value: 0 }),
        }
    }

    /// Read exactly `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Read a variable-length sequence of `T`.
    pub fn get_seq<T: Wire>(&mut self) -> Result<Vec<T>, WireError> {
        let len = self.get_len()?;
        let mut items = Vec::with_capacity(len.min(256));
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Read a fixed-size array of `T`.
    pub fn get_array<T: Wire, const N: usize>(&mut self) -> Result<[T; N], WireError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(self)?);
        }
        // Length is exactly N by construction.
        match items.try_into() {
            Ok(arr) => Ok(arr),
            Err(_) => self.fail(WireError::TruncatedInput),
        }
    }

    /// Consume `expected` and fail with [`WireError::MagicMismatch`] if the
    /// bytes differ.
    pub fn expect_magic(&mut self, expected: &[u8]) -> Result<(), WireError> {
        let actual = self.take(expected.len())?;
        if actual != expected {
            return self.fail(WireError::MagicMismatch);
        }
        Ok(())
    }
}

// =============================================================================
// WIRE IMPLS FOR PRIMITIVES
// =============================================================================

macro_rules! impl_wire_primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Wire for $ty {
            fn encode(&self, w: &mut Writer) {
                w.$put(*self);
            }
            fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
                r.$get()
            }
        }
    };
}

impl_wire_primitive!(u8, put_u8, get_u8);
impl_wire_primitive!(u16, put_u16, get_u16);
impl_wire_primitive!(u32, put_u32, get_u32);
impl_wire_primitive!(u64, put_u64, get_u64);
impl_wire_primitive!(i8, put_i8, get_i8);
impl_wire_primitive!(i16, put_i16, get_i16);
impl_wire_primitive!(i32, put_i32, get_i32);
impl_wire_primitive!(i64, put_i64, get_i64);
impl_wire_primitive!(f32, put_f32, get_f32);
impl_wire_primitive!(f64, put_f64, get_f64);
impl_wire_primitive!(bool, put_bool, get_bool);

impl Wire for String {
    fn encode(&self, w: &mut Writer) {
        w.put_str(self);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.get_string()
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, w: &mut Writer) {
        w.put_seq(self);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.get_seq()
    }
}

impl<T: Wire, const N: usize> Wire for [T; N] {
    fn encode(&self, w: &mut Writer) {
        for item in self {
            item.encode(w);
        }
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.get_array()
    }
}

/// `Option<T>` encodes as a tagged variant: 0 = None, 1 = Some(payload).
impl<T: Wire> Wire for Option<T> {
    fn encode(&self, w: &mut Writer) {
        match self {
            None => w.put_u8(0),
            Some(v) => {
                w.put_u8(1);
                v.encode(w);
            }
        }
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match r.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            tag => {
                let err = WireError::BadVariantTag { type_name: "Option", tag };
                r.fail(err)
            }
        }
    }
}

impl<A: Wire, B: Wire> Wire for (A, B) {
    fn encode(&self, w: &mut Writer) {
        self.0.encode(w);
        self.1.encode(w);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok((A::decode(r)?, B::decode(r)?))
    }
}

//! # Deterministic Binary Codec
//!
//! Sequential writer/reader pair used for every consensus-critical encoding:
//! transaction hash preimages, block bytes, trie nodes, on-disk values, and
//! network payloads.
//!
//! ## Rules
//!
//! - Fixed-width integers are little-endian.
//! - `Hash`, `Address`, `U256`, and signature blobs are raw fixed-length bytes.
//! - Variable-length byte sequences are prefixed with an unsigned varint
//!   length (7 bits per byte, continuation bit in the high bit).
//! - Every structured type has exactly one encoding: decode followed by
//!   encode returns byte-identical output.

use crate::primitives::{Address, BlsPub, BlsSig, Ed25519Pub, Ed25519Sig, Hash, U256};
use thiserror::Error;

/// Codec failure kinds.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before the expected field.
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// Varint did not terminate within 10 bytes or overflowed u64.
    #[error("varint overflow at offset {0}")]
    VarintOverflow(usize),

    /// Input had bytes left after the last field.
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    /// An enum tag byte was outside the known range.
    #[error("invalid tag {tag} for {context}")]
    InvalidTag { tag: u8, context: &'static str },

    /// A length prefix exceeded the configured bound.
    #[error("declared length {declared} exceeds limit {limit}")]
    OversizedInput { declared: u64, limit: u64 },
}

/// Maximum payload length a varint prefix may declare. Bounds allocation on
/// decode of untrusted input.
pub const MAX_BYTES_LEN: u64 = 16 * 1024 * 1024;

// =============================================================================
// ENCODER
// =============================================================================

/// Sequential append encoder.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Pre-size the buffer when the caller knows the rough output size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 32-byte little-endian U256.
    pub fn put_u256(&mut self, v: &U256) {
        let mut bytes = [0u8; 32];
        v.to_little_endian(&mut bytes);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_hash(&mut self, v: &Hash) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn put_address(&mut self, v: &Address) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// Raw fixed-length bytes, no length prefix.
    pub fn put_fixed(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Unsigned varint, 7 bits per byte, continuation high bit.
    pub fn put_uvarint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Varint length prefix followed by the bytes.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_uvarint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the encoder and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// DECODER
// =============================================================================

/// Sequential parse decoder over a borrowed buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    pub fn get_u256(&mut self) -> Result<U256, CodecError> {
        let b = self.take(32)?;
        Ok(U256::from_little_endian(b))
    }

    pub fn get_hash(&mut self) -> Result<Hash, CodecError> {
        let b = self.take(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(b);
        Ok(Hash::from_bytes(arr))
    }

    pub fn get_address(&mut self) -> Result<Address, CodecError> {
        let b = self.take(20)?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(b);
        Ok(Address::from_bytes(arr))
    }

    pub fn get_fixed<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let b = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    pub fn get_uvarint(&mut self) -> Result<u64, CodecError> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.get_u8().map_err(|_| CodecError::UnexpectedEof(start))?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow(start));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow(start));
            }
        }
    }

    /// Varint-prefixed byte sequence, bounded by [`MAX_BYTES_LEN`].
    pub fn get_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.get_uvarint()?;
        if len > MAX_BYTES_LEN {
            return Err(CodecError::OversizedInput {
                declared: len,
                limit: MAX_BYTES_LEN,
            });
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Fail unless the input was consumed exactly.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(CodecError::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Types with a single canonical binary encoding.
pub trait Encodable {
    fn encode_into(&self, enc: &mut Encoder);

    fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_into(&mut enc);
        enc.finish()
    }
}

/// Types parseable from their canonical encoding.
pub trait Decodable: Sized {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError>;

    /// Decode a complete buffer, rejecting trailing bytes.
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(buf);
        let value = Self::decode_from(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}

// Blanket impls for the signature blobs keep entity encoders terse.
macro_rules! fixed_codec {
    ($name:ident) => {
        impl Encodable for $name {
            fn encode_into(&self, enc: &mut Encoder) {
                enc.put_fixed(self.as_bytes());
            }
        }

        impl Decodable for $name {
            fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
                Ok($name::from_bytes(dec.get_fixed()?))
            }
        }
    };
}

fixed_codec!(Ed25519Sig);
fixed_codec!(Ed25519Pub);
fixed_codec!(BlsSig);
fixed_codec!(BlsPub);

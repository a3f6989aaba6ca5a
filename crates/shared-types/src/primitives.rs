//! # Primitive Value Types
//!
//! Fixed-width value types used throughout the chain: 32-byte hashes,
//! 20-byte addresses, 256-bit balances, and signature/public-key blobs.
//!
//! All of them share one canonical textual form: lowercase hex with a `0x`
//! prefix at fixed length. `Display`, `Debug`, and `FromStr` agree on it.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;
use std::str::FromStr;

/// 256-bit unsigned integer for balances, fees, and stake.
pub use primitive_types::U256;

// =============================================================================
// HEX HELPERS
// =============================================================================

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "0x")?;
    for b in bytes {
        write!(
            f,
            "{}{}",
            HEX_CHARS[(b >> 4) as usize] as char,
            HEX_CHARS[(b & 0x0f) as usize] as char
        )?;
    }
    Ok(())
}

fn parse_hex(s: &str, out: &mut [u8]) -> Result<(), HexError> {
    let body = s.strip_prefix("0x").ok_or(HexError::MissingPrefix)?;
    if body.len() != out.len() * 2 {
        return Err(HexError::BadLength {
            expected: out.len() * 2,
            actual: body.len(),
        });
    }
    for (i, chunk) in body.as_bytes().chunks_exact(2).enumerate() {
        let hi = hex_val(chunk[0])?;
        let lo = hex_val(chunk[1])?;
        out[i] = (hi << 4) | lo;
    }
    Ok(())
}

fn hex_val(c: u8) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(HexError::BadDigit(c as char)),
    }
}

/// Error parsing the canonical hex form.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("expected {expected} hex digits, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("invalid hex digit '{0}' (uppercase is not canonical)")]
    BadDigit(char),
}

macro_rules! fixed_bytes {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[serde_as]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde_as(as = "Bytes")] pub [u8; $len]);

        impl $name {
            /// Byte width of this type.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            /// True if every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a slice, failing on length mismatch.
            pub fn from_slice(slice: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = slice.try_into().ok()?;
                Some(Self(arr))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl FromStr for $name {
            type Err = HexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; $len];
                parse_hex(s, &mut out)?;
                Ok(Self(out))
            }
        }
    };
}

fixed_bytes!(
    /// A 32-byte BLAKE3 hash, compared byte-wise.
    Hash,
    32
);

fixed_bytes!(
    /// A 20-byte account address (last 20 bytes of Keccak-256 of the
    /// Ed25519 public key).
    Address,
    20
);

fixed_bytes!(
    /// A 64-byte Ed25519 signature blob.
    Ed25519Sig,
    64
);

fixed_bytes!(
    /// A 32-byte Ed25519 public key blob.
    Ed25519Pub,
    32
);

fixed_bytes!(
    /// A 96-byte BLS12-381 signature blob (min_pk, G2 point, compressed).
    BlsSig,
    96
);

fixed_bytes!(
    /// A 48-byte BLS12-381 public key blob (min_pk, G1 point, compressed).
    BlsPub,
    48
);

impl Hash {
    /// Hash arbitrary bytes with BLAKE3.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

// =============================================================================
// U256 CANONICAL TEXT FORM
// =============================================================================

/// Render a U256 as fixed-length lowercase `0x` hex (64 digits).
pub fn u256_to_hex(value: &U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let mut s = String::with_capacity(66);
    s.push_str("0x");
    for b in buf {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0f) as usize] as char);
    }
    s
}

/// Parse a U256 from the canonical fixed-length hex form.
pub fn u256_from_hex(s: &str) -> Result<U256, HexError> {
    let mut buf = [0u8; 32];
    parse_hex(s, &mut buf)?;
    Ok(U256::from_big_endian(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let h = Hash::from_bytes(bytes);
        let text = h.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<Hash>().unwrap(), h);
    }

    #[test]
    fn rejects_uppercase_and_bad_length() {
        assert!(matches!(
            "ab".repeat(20).parse::<Address>(),
            Err(HexError::MissingPrefix)
        ));
        let upper = format!("0x{}", "AB".repeat(20));
        assert!(matches!(upper.parse::<Address>(), Err(HexError::BadDigit('A'))));
        let short = format!("0x{}", "ab".repeat(19));
        assert!(matches!(short.parse::<Address>(), Err(HexError::BadLength { .. })));
    }

    #[test]
    fn zero_is_zero() {
        assert!(Hash::zero().is_zero());
        assert!(!Hash::digest(b"x").is_zero());
    }

    #[test]
    fn u256_hex_is_fixed_length() {
        let v = U256::from(0xdeadbeefu64);
        let text = u256_to_hex(&v);
        assert_eq!(text.len(), 66);
        assert_eq!(u256_from_hex(&text).unwrap(), v);
    }
}

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Represents a 128-bit Bluetooth UUID.
///
/// Internally the UUID is stored as big-endian bytes, the order in which it is
/// written in its canonical hyphenated form. 16-bit SIG-assigned values are
/// expanded against the Bluetooth base UUID.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// "00000000-0000-1000-8000-00805F9B34FB"
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Characters of the canonical string that hold the 16-bit short id.
const SHORT_ID_RANGE: std::ops::Range<usize> = 4..8;

impl Uuid {
    /// Creates a UUID from its 128-bit integer value.
    pub const fn from_u128(value: u128) -> Self {
        Uuid {
            bytes: value.to_be_bytes(),
        }
    }

    /// Creates a 128-bit UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        Uuid::from_u128(BASE_UUID | ((uuid16 as u128) << 96))
    }

    /// Returns the 128-bit integer value.
    pub const fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.bytes)
    }

    /// Returns the underlying 16 bytes in big-endian order.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Returns `Some(u16)` if this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        let short = (value >> 96) as u32;
        if value & !(0xFFFF_FFFFu128 << 96) == BASE_UUID && short <= u16::MAX as u32 {
            Some(short as u16)
        } else {
            None
        }
    }

    /// The four hex digits at positions 4..8 of the canonical string.
    ///
    /// For SIG-assigned UUIDs this is the 16-bit assigned number, e.g. `2902`.
    pub fn short_id(&self) -> String {
        self.to_string()[SHORT_ID_RANGE].to_string()
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u128> for Uuid {
    fn from(value: u128) -> Self {
        Uuid::from_u128(value)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(short) => write!(f, "Uuid(0x{:04X})", short),
            None => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4 or 32 hex digits, found {0}")]
    InvalidLength(usize),

    #[error("Invalid UUID character: {0}")]
    InvalidCharacter(char),

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts the hyphenated 128-bit form, the same without hyphens, or a
    /// 4-digit 16-bit short form such as `2902`. Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_hexdigit() && *c != '-') {
            return Err(UuidParseError::InvalidCharacter(bad));
        }
        let digits: String = s.chars().filter(|c| *c != '-').collect();

        match digits.len() {
            4 => {
                let mut short = [0u8; 2];
                hex::decode_to_slice(&digits, &mut short)?;
                Ok(Uuid::from_u16(u16::from_be_bytes(short)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&digits, &mut bytes)?;
                Ok(Uuid { bytes })
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}

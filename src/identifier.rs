//! Object identifiers and their canonical byte encoding
//!
//! Every identifier variant has exactly one encoding: a tag byte followed by
//! the variant payload. The tag keeps `"1"` and `1` apart, so routing never
//! confuses a string identifier with an integer one.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Largest payload accepted for string and byte identifiers
pub const MAX_ID_LEN: usize = u16::MAX as usize;

const TAG_STRING: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_UUID: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;

/// Errors raised when an identifier has no canonical encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// String and byte identifiers must not be empty
    #[error("identifier is empty")]
    Empty,

    /// The payload exceeds [`MAX_ID_LEN`]
    #[error("identifier is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },
}

/// Identifier of the object an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectId {
    /// UTF-8 string identifier
    String(String),
    /// Signed integer identifier
    Integer(i64),
    /// UUID identifier
    Uuid(Uuid),
    /// Raw byte identifier
    Bytes(Vec<u8>),
}

impl ObjectId {
    /// Encode the identifier into its canonical byte sequence
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::String(s) => tagged(TAG_STRING, s.as_bytes()),
            Self::Integer(n) => {
                let mut buf = Vec::with_capacity(9);
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&n.to_be_bytes());
                Ok(buf)
            }
            Self::Uuid(id) => {
                let mut buf = Vec::with_capacity(17);
                buf.push(TAG_UUID);
                buf.extend_from_slice(id.as_bytes());
                Ok(buf)
            }
            Self::Bytes(b) => tagged(TAG_BYTES, b),
        }
    }

    /// Name of the identifier variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Uuid(_) => "uuid",
            Self::Bytes(_) => "bytes",
        }
    }
}

fn tagged(tag: u8, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.is_empty() {
        return Err(EncodeError::Empty);
    }
    if payload.len() > MAX_ID_LEN {
        return Err(EncodeError::TooLong {
            len: payload.len(),
            max: MAX_ID_LEN,
        });
    }

    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.push(tag);
    buf.extend_from_slice(payload);
    Ok(buf)
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Uuid(id) => write!(f, "{}", id),
            Self::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ObjectId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ObjectId {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<u32> for ObjectId {
    fn from(value: u32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<Uuid> for ObjectId {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for ObjectId {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

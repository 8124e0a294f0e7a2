//! Canonical binary codec for consensus objects.
//!
//! Integers are CryptoNote varints: 7-bit groups, least significant first,
//! high bit set on every byte except the last. Exactly one encoding exists
//! for every value; overlong forms are rejected.

use crate::types::{Hash, KeyImage, PublicKey, Signature};

const MAX_VARINT_BYTES: usize = 10;

#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    pub fn write_key(&mut self, key: &PublicKey) {
        self.buf.extend_from_slice(key.as_bytes());
    }

    pub fn write_key_image(&mut self, image: &KeyImage) {
        self.buf.extend_from_slice(image.as_bytes());
    }

    pub fn write_signature(&mut self, signature: &Signature) {
        self.buf.extend_from_slice(signature.as_bytes());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    MalformedVarInt,
    SizeTooLarge,
    UnknownTag(u8),
    InvalidData(&'static str),
    TrailingBytes,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::MalformedVarInt => write!(f, "malformed varint"),
            DecodeError::SizeTooLarge => write!(f, "length prefix exceeds remaining input"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown tag byte 0x{tag:02x}"),
            DecodeError::InvalidData(message) => write!(f, "{message}"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after decode"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub struct Decoder<'a> {
    input: &'a [u8],
    cursor: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.input.len().saturating_sub(self.cursor)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor >= self.input.len()
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.input[start..start + len])
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            let group = (byte & 0x7f) as u64;
            if i == MAX_VARINT_BYTES - 1 && group > 1 {
                return Err(DecodeError::MalformedVarInt);
            }
            value |= group << (7 * i);
            if byte & 0x80 == 0 {
                if group == 0 && i > 0 {
                    return Err(DecodeError::MalformedVarInt);
                }
                return Ok(value);
            }
        }
        Err(DecodeError::MalformedVarInt)
    }

    pub fn read_varint_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| DecodeError::MalformedVarInt)
    }

    pub fn read_varint_u8(&mut self) -> Result<u8, DecodeError> {
        let value = self.read_varint()?;
        u8::try_from(value).map_err(|_| DecodeError::MalformedVarInt)
    }

    /// Length prefix for a sequence whose elements occupy at least
    /// `min_element_size` bytes each. Anything the remaining input cannot
    /// possibly hold is rejected before allocation.
    pub fn read_length(&mut self, min_element_size: usize) -> Result<usize, DecodeError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::SizeTooLarge)?;
        if len.saturating_mul(min_element_size.max(1)) > self.remaining() {
            return Err(DecodeError::SizeTooLarge);
        }
        Ok(len)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.read_slice(len)?.to_vec())
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_length(1)?;
        self.read_bytes(len)
    }

    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_hash(&mut self) -> Result<Hash, DecodeError> {
        Ok(Hash(self.read_fixed()?))
    }

    pub fn read_key(&mut self) -> Result<PublicKey, DecodeError> {
        Ok(PublicKey(self.read_fixed()?))
    }

    pub fn read_key_image(&mut self) -> Result<KeyImage, DecodeError> {
        Ok(KeyImage(self.read_fixed()?))
    }

    pub fn read_signature(&mut self) -> Result<Signature, DecodeError> {
        Ok(Signature(self.read_fixed()?))
    }
}

pub trait Encodable {
    fn consensus_encode(&self, encoder: &mut Encoder);
}

pub trait Decodable: Sized {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError>;
}

pub fn encode<T: Encodable>(value: &T) -> Vec<u8> {
    let mut encoder = Encoder::new();
    value.consensus_encode(&mut encoder);
    encoder.into_inner()
}

pub fn decode<T: Decodable>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let value = T::consensus_decode(&mut decoder)?;
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

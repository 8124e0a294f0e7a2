//! Block header, block, and the raw wire record.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{cn_fast_hash, tree_hash};
use crate::transaction::Transaction;
use crate::types::Hash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub prev_hash: Hash,
    pub timestamp: u64,
    /// Fixed-width so miners can patch it in place.
    pub nonce: u32,
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.major_version as u64);
        encoder.write_varint(self.minor_version as u64);
        encoder.write_hash(&self.prev_hash);
        encoder.write_varint(self.timestamp);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(BlockHeader {
            major_version: decoder.read_varint_u8()?,
            minor_version: decoder.read_varint_u8()?,
            prev_hash: decoder.read_hash()?,
            timestamp: decoder.read_varint()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub coinbase: Transaction,
    /// Hashes of the non-coinbase transactions, in block order.
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// Merkle root over the coinbase hash followed by the referenced hashes.
    pub fn merkle_root(&self) -> Hash {
        let mut hashes = Vec::with_capacity(1 + self.tx_hashes.len());
        hashes.push(self.coinbase.hash());
        hashes.extend_from_slice(&self.tx_hashes);
        tree_hash(&hashes)
    }

    /// Blob the block identity and proof of work are computed over: the
    /// serialized header, the merkle root, and the transaction count.
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode(&mut encoder);
        encoder.write_hash(&self.merkle_root());
        encoder.write_varint(1 + self.tx_hashes.len() as u64);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash {
        cn_fast_hash(&self.hashing_blob())
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        self.coinbase.consensus_encode(encoder);
        encoder.write_varint(self.tx_hashes.len() as u64);
        for hash in &self.tx_hashes {
            encoder.write_hash(hash);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let coinbase = Transaction::consensus_decode(decoder)?;
        let count = decoder.read_length(32)?;
        let mut tx_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            tx_hashes.push(decoder.read_hash()?);
        }
        Ok(Block {
            header,
            coinbase,
            tx_hashes,
        })
    }
}

/// A block as shipped between nodes and stored on disk: the serialized
/// block alongside the serialized bodies of its referenced transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawBlock {
    pub block: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl Encodable for RawBlock {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.block);
        encoder.write_varint(self.transactions.len() as u64);
        for blob in &self.transactions {
            encoder.write_var_bytes(blob);
        }
    }
}

impl Decodable for RawBlock {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block = decoder.read_var_bytes()?;
        let count = decoder.read_length(1)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(decoder.read_var_bytes()?);
        }
        Ok(RawBlock {
            block,
            transactions,
        })
    }
}

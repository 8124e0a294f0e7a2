//! Transaction prefix, inputs, outputs, and signatures.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::cn_fast_hash;
use crate::types::{Hash, KeyImage, PublicKey, Signature};

pub const TAG_INPUT_COINBASE: u8 = 0xff;
pub const TAG_INPUT_KEY: u8 = 0x02;
pub const TAG_INPUT_MULTISIGNATURE: u8 = 0x03;
pub const TAG_OUTPUT_KEY: u8 = 0x02;
pub const TAG_OUTPUT_MULTISIGNATURE: u8 = 0x03;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInput {
    pub amount: u64,
    pub key_image: KeyImage,
    /// Decoy ring as relative offsets into the per-amount output list. The
    /// first entry is absolute, each later entry is a delta from the
    /// previous one.
    pub output_offsets: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisignatureInput {
    pub amount: u64,
    pub signature_count: u8,
    pub output_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionInput {
    Coinbase { height: u64 },
    Key(KeyInput),
    Multisignature(MultisignatureInput),
}

impl TransactionInput {
    pub fn amount(&self) -> u64 {
        match self {
            TransactionInput::Coinbase { .. } => 0,
            TransactionInput::Key(input) => input.amount,
            TransactionInput::Multisignature(input) => input.amount,
        }
    }

    /// Number of signatures the input demands in its signature group.
    pub fn signature_count(&self) -> usize {
        match self {
            TransactionInput::Coinbase { .. } => 0,
            TransactionInput::Key(input) => input.output_offsets.len(),
            TransactionInput::Multisignature(input) => input.signature_count as usize,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisignatureOutput {
    pub keys: Vec<PublicKey>,
    pub required_signatures: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    Key(PublicKey),
    Multisignature(MultisignatureOutput),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: OutputTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    /// One group per input; group length equals the input's ring size.
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        cn_fast_hash(&crate::encoding::encode(self))
    }

    pub fn prefix_hash(&self) -> Hash {
        cn_fast_hash(&crate::encoding::encode(&self.prefix))
    }

    pub fn size(&self) -> usize {
        crate::encoding::encode(self).len()
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(
            self.prefix.inputs.as_slice(),
            [TransactionInput::Coinbase { .. }]
        )
    }

    pub fn input_amount(&self) -> Option<u64> {
        let mut total: u64 = 0;
        for input in &self.prefix.inputs {
            total = total.checked_add(input.amount())?;
        }
        Some(total)
    }

    pub fn output_amount(&self) -> Option<u64> {
        let mut total: u64 = 0;
        for output in &self.prefix.outputs {
            total = total.checked_add(output.amount)?;
        }
        Some(total)
    }

    /// `inputs − outputs`, or `None` on overflow / outputs exceeding inputs.
    pub fn fee(&self) -> Option<u64> {
        self.input_amount()?.checked_sub(self.output_amount()?)
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key(key_input) => Some(&key_input.key_image),
            _ => None,
        })
    }
}

/// Prefix-sum reconstruction of absolute ring member indices.
/// Returns `None` if any partial sum overflows.
pub fn relative_offsets_to_absolute(offsets: &[u64]) -> Option<Vec<u64>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut last: u64 = 0;
    for (i, offset) in offsets.iter().enumerate() {
        let value = if i == 0 {
            *offset
        } else {
            last.checked_add(*offset)?
        };
        absolute.push(value);
        last = value;
    }
    Some(absolute)
}

/// Inverse of [`relative_offsets_to_absolute`]; requires strictly ascending
/// input past the first element.
pub fn absolute_offsets_to_relative(offsets: &[u64]) -> Option<Vec<u64>> {
    let mut relative = Vec::with_capacity(offsets.len());
    for (i, offset) in offsets.iter().enumerate() {
        if i == 0 {
            relative.push(*offset);
        } else {
            if *offset <= offsets[i - 1] {
                return None;
            }
            relative.push(offset - offsets[i - 1]);
        }
    }
    Some(relative)
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match self {
            TransactionInput::Coinbase { height } => {
                encoder.write_u8(TAG_INPUT_COINBASE);
                encoder.write_varint(*height);
            }
            TransactionInput::Key(input) => {
                encoder.write_u8(TAG_INPUT_KEY);
                encoder.write_varint(input.amount);
                encoder.write_varint(input.output_offsets.len() as u64);
                for offset in &input.output_offsets {
                    encoder.write_varint(*offset);
                }
                encoder.write_key_image(&input.key_image);
            }
            TransactionInput::Multisignature(input) => {
                encoder.write_u8(TAG_INPUT_MULTISIGNATURE);
                encoder.write_varint(input.amount);
                encoder.write_varint(input.signature_count as u64);
                encoder.write_varint(input.output_index);
            }
        }
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        match decoder.read_u8()? {
            TAG_INPUT_COINBASE => Ok(TransactionInput::Coinbase {
                height: decoder.read_varint()?,
            }),
            TAG_INPUT_KEY => {
                let amount = decoder.read_varint()?;
                let count = decoder.read_length(1)?;
                let mut output_offsets = Vec::with_capacity(count);
                for _ in 0..count {
                    output_offsets.push(decoder.read_varint()?);
                }
                let key_image = decoder.read_key_image()?;
                Ok(TransactionInput::Key(KeyInput {
                    amount,
                    key_image,
                    output_offsets,
                }))
            }
            TAG_INPUT_MULTISIGNATURE => Ok(TransactionInput::Multisignature(MultisignatureInput {
                amount: decoder.read_varint()?,
                signature_count: decoder.read_varint_u8()?,
                output_index: decoder.read_varint()?,
            })),
            tag => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.amount);
        match &self.target {
            OutputTarget::Key(key) => {
                encoder.write_u8(TAG_OUTPUT_KEY);
                encoder.write_key(key);
            }
            OutputTarget::Multisignature(target) => {
                encoder.write_u8(TAG_OUTPUT_MULTISIGNATURE);
                encoder.write_varint(target.keys.len() as u64);
                for key in &target.keys {
                    encoder.write_key(key);
                }
                encoder.write_varint(target.required_signatures as u64);
            }
        }
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_varint()?;
        let target = match decoder.read_u8()? {
            TAG_OUTPUT_KEY => OutputTarget::Key(decoder.read_key()?),
            TAG_OUTPUT_MULTISIGNATURE => {
                let count = decoder.read_length(32)?;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(decoder.read_key()?);
                }
                let required_signatures = decoder.read_varint_u8()?;
                OutputTarget::Multisignature(MultisignatureOutput {
                    keys,
                    required_signatures,
                })
            }
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        Ok(TransactionOutput { amount, target })
    }
}

impl Encodable for TransactionPrefix {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.version as u64);
        encoder.write_varint(self.unlock_time);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(encoder);
        }
        encoder.write_var_bytes(&self.extra);
    }
}

impl Decodable for TransactionPrefix {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_varint_u8()?;
        let unlock_time = decoder.read_varint()?;
        let input_count = decoder.read_length(2)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TransactionInput::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_length(2)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TransactionOutput::consensus_decode(decoder)?);
        }
        let extra = decoder.read_var_bytes()?;
        Ok(TransactionPrefix {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prefix.consensus_encode(encoder);
        // Signature counts are derived from the inputs, so groups are
        // emitted without their own length prefixes.
        for group in &self.signatures {
            for signature in group {
                encoder.write_signature(signature);
            }
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prefix = TransactionPrefix::consensus_decode(decoder)?;
        let mut signatures = Vec::with_capacity(prefix.inputs.len());
        for input in &prefix.inputs {
            let count = input.signature_count();
            if count * 64 > decoder.remaining() {
                return Err(DecodeError::SizeTooLarge);
            }
            let mut group = Vec::with_capacity(count);
            for _ in 0..count {
                group.push(decoder.read_signature()?);
            }
            signatures.push(group);
        }
        Ok(Transaction { prefix, signatures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample_key_input() -> TransactionInput {
        TransactionInput::Key(KeyInput {
            amount: 7_000_000,
            key_image: KeyImage([3u8; 32]),
            output_offsets: vec![12, 5, 1, 90],
        })
    }

    fn sample_tx() -> Transaction {
        let inputs = vec![sample_key_input()];
        let signatures = vec![vec![Signature([9u8; 64]); 4]];
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs,
                outputs: vec![TransactionOutput {
                    amount: 6_000_000,
                    target: OutputTarget::Key(PublicKey([5u8; 32])),
                }],
                extra: vec![1, 2, 3],
            },
            signatures,
        }
    }

    #[test]
    fn input_round_trip() {
        let input = sample_key_input();
        assert_eq!(decode::<TransactionInput>(&encode(&input)), Ok(input));
    }

    #[test]
    fn coinbase_round_trip() {
        let input = TransactionInput::Coinbase { height: 812 };
        assert_eq!(decode::<TransactionInput>(&encode(&input)), Ok(input));
    }

    #[test]
    fn multisignature_output_round_trip() {
        let output = TransactionOutput {
            amount: 100,
            target: OutputTarget::Multisignature(MultisignatureOutput {
                keys: vec![PublicKey([1u8; 32]), PublicKey([2u8; 32])],
                required_signatures: 2,
            }),
        };
        assert_eq!(decode::<TransactionOutput>(&encode(&output)), Ok(output));
    }

    #[test]
    fn transaction_round_trip() {
        let tx = sample_tx();
        assert_eq!(decode::<Transaction>(&encode(&tx)), Ok(tx));
    }

    #[test]
    fn rejects_unknown_input_tag() {
        let mut bytes = encode(&sample_key_input());
        bytes[0] = 0x77;
        assert_eq!(
            decode::<TransactionInput>(&bytes),
            Err(DecodeError::UnknownTag(0x77))
        );
    }

    #[test]
    fn rejects_truncated_signatures() {
        let tx = sample_tx();
        let mut bytes = encode(&tx);
        bytes.truncate(bytes.len() - 1);
        assert!(decode::<Transaction>(&bytes).is_err());
    }

    #[test]
    fn offset_conversion_round_trip() {
        let absolute = vec![3u64, 10, 11, 250, 9_000];
        let relative = absolute_offsets_to_relative(&absolute).unwrap();
        assert_eq!(relative, vec![3, 7, 1, 239, 8_750]);
        assert_eq!(
            relative_offsets_to_absolute(&relative),
            Some(absolute)
        );
    }

    #[test]
    fn offset_conversion_rejects_descending() {
        assert_eq!(absolute_offsets_to_relative(&[5, 5]), None);
        assert_eq!(absolute_offsets_to_relative(&[9, 2]), None);
    }

    #[test]
    fn offset_reconstruction_rejects_overflow() {
        assert_eq!(relative_offsets_to_absolute(&[u64::MAX, 1]), None);
    }

    #[test]
    fn fee_is_inputs_minus_outputs() {
        let tx = sample_tx();
        assert_eq!(tx.fee(), Some(1_000_000));
    }

    #[test]
    fn prefix_hash_ignores_signatures() {
        let tx = sample_tx();
        let mut unsigned = tx.clone();
        unsigned.signatures[0][0] = Signature([0u8; 64]);
        assert_eq!(tx.prefix_hash(), unsigned.prefix_hash());
        assert_ne!(tx.hash(), unsigned.hash());
    }
}

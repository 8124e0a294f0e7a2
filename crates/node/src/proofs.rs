//! Wallet-facing proof objects: signed messages, addresses, and reserve
//! proofs, all framed as tagged base58 strings.

use ssix_consensus::Currency;
use ssix_crypto::CryptoOracle;
use ssix_primitives::address::{decode_object_with_prefix, encode_object, AddressError};
use ssix_primitives::encoding::{
    decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use ssix_primitives::types::{Hash, KeyImage, PublicKey, SecretKey, Signature};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountAddress {
    pub spend: PublicKey,
    pub view: PublicKey,
}

impl AccountAddress {
    pub fn encode(&self, currency: &Currency) -> String {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(self.spend.as_bytes());
        body.extend_from_slice(self.view.as_bytes());
        encode_object(currency.address_prefix(), &body)
    }

    pub fn decode(input: &str, currency: &Currency) -> Result<Self, AddressError> {
        let body = decode_object_with_prefix(input, currency.address_prefix())?;
        if body.len() != 64 {
            return Err(AddressError::InvalidLength);
        }
        Ok(Self {
            spend: PublicKey::from_slice(&body[..32]).ok_or(AddressError::InvalidLength)?,
            view: PublicKey::from_slice(&body[32..]).ok_or(AddressError::InvalidLength)?,
        })
    }
}

/// Sign arbitrary bytes with a spend key, framed under the signature prefix.
pub fn sign_message(
    data: &[u8],
    public: &PublicKey,
    secret: &SecretKey,
    oracle: &dyn CryptoOracle,
    currency: &Currency,
) -> Option<String> {
    let digest = oracle.fast_hash(data);
    let signature = oracle.generate_signature(&digest, public, secret)?;
    Some(encode_object(
        currency.keys_signature_prefix(),
        signature.as_bytes(),
    ))
}

pub fn verify_message(
    data: &[u8],
    public: &PublicKey,
    encoded: &str,
    oracle: &dyn CryptoOracle,
    currency: &Currency,
) -> bool {
    let Ok(body) = decode_object_with_prefix(encoded, currency.keys_signature_prefix()) else {
        return false;
    };
    let Some(signature) = Signature::from_slice(&body) else {
        return false;
    };
    oracle.check_signature(&oracle.fast_hash(data), public, &signature)
}

/// One proven output: the signer demonstrates it can derive the output's
/// key image, with a signature per claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveProofEntry {
    pub tx_hash: Hash,
    pub index_in_tx: u64,
    pub shared_secret: PublicKey,
    pub key_image: KeyImage,
    pub shared_secret_sig: Signature,
    pub key_image_sig: Signature,
}

impl Encodable for ReserveProofEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.tx_hash);
        encoder.write_varint(self.index_in_tx);
        encoder.write_key(&self.shared_secret);
        encoder.write_key_image(&self.key_image);
        encoder.write_signature(&self.shared_secret_sig);
        encoder.write_signature(&self.key_image_sig);
    }
}

impl Decodable for ReserveProofEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            tx_hash: decoder.read_hash()?,
            index_in_tx: decoder.read_varint()?,
            shared_secret: decoder.read_key()?,
            key_image: decoder.read_key_image()?,
            shared_secret_sig: decoder.read_signature()?,
            key_image_sig: decoder.read_signature()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveProof {
    pub entries: Vec<ReserveProofEntry>,
    pub spend_signature: Signature,
}

impl Encodable for ReserveProof {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.entries.len() as u64);
        for entry in &self.entries {
            entry.consensus_encode(encoder);
        }
        encoder.write_signature(&self.spend_signature);
    }
}

impl Decodable for ReserveProof {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_length(32)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(ReserveProofEntry::consensus_decode(decoder)?);
        }
        Ok(Self {
            entries,
            spend_signature: decoder.read_signature()?,
        })
    }
}

pub fn encode_reserve_proof(proof: &ReserveProof, currency: &Currency) -> String {
    encode_object(currency.reserve_proof_prefix(), &encode(proof))
}

pub fn decode_reserve_proof(input: &str, currency: &Currency) -> Option<ReserveProof> {
    let body = decode_object_with_prefix(input, currency.reserve_proof_prefix()).ok()?;
    decode::<ReserveProof>(&body).ok()
}

/// The digest the proof signatures commit to: the free-form message, the
/// prover's address, and every claimed key image and shared secret, in
/// order. Including the shared secrets binds both halves of each signed
/// pair to the same statement.
pub fn reserve_proof_digest(
    message: &str,
    address: &AccountAddress,
    entries: &[ReserveProofEntry],
    oracle: &dyn CryptoOracle,
) -> Hash {
    let mut data = Vec::with_capacity(message.len() + 64 + entries.len() * 64);
    data.extend_from_slice(message.as_bytes());
    data.extend_from_slice(address.spend.as_bytes());
    data.extend_from_slice(address.view.as_bytes());
    for entry in entries {
        data.extend_from_slice(entry.key_image.as_bytes());
        data.extend_from_slice(entry.shared_secret.as_bytes());
    }
    oracle.fast_hash(&data)
}

/// Wallet keys a prover signs with.
pub struct AccountKeys {
    pub address: AccountAddress,
    pub view_secret: SecretKey,
    pub spend_secret: SecretKey,
}

/// One unspent output offered as reserve backing.
pub struct ReserveSource {
    pub tx_hash: Hash,
    pub index_in_tx: u64,
    /// Transaction key published in the source transaction's extra.
    pub tx_public_key: PublicKey,
    pub one_time_public: PublicKey,
    pub one_time_secret: SecretKey,
}

/// Produce a reserve proof over `sources`: per output, the key image and
/// the view-key shared secret (`view_secret · tx_public_key`), each backed
/// by a signature over the common digest, plus one spend-key signature over
/// the whole statement.
pub fn generate_reserve_proof(
    sources: &[ReserveSource],
    keys: &AccountKeys,
    message: &str,
    oracle: &dyn CryptoOracle,
    currency: &Currency,
) -> Option<String> {
    let placeholder = Signature([0u8; 64]);
    let mut entries = Vec::with_capacity(sources.len());
    for source in sources {
        let key_image =
            oracle.generate_key_image(&source.one_time_public, &source.one_time_secret)?;
        let shared_secret = oracle.scalar_mult_key(&source.tx_public_key, &keys.view_secret)?;
        entries.push(ReserveProofEntry {
            tx_hash: source.tx_hash,
            index_in_tx: source.index_in_tx,
            shared_secret,
            key_image,
            shared_secret_sig: placeholder,
            key_image_sig: placeholder,
        });
    }

    // Key images and shared secrets are fixed now, so the digest is too.
    let digest = reserve_proof_digest(message, &keys.address, &entries, oracle);
    for (entry, source) in entries.iter_mut().zip(sources.iter()) {
        entry.shared_secret_sig =
            oracle.generate_signature(&digest, &keys.address.view, &keys.view_secret)?;
        entry.key_image_sig = oracle
            .generate_ring_signature(
                &digest,
                &entry.key_image,
                std::slice::from_ref(&source.one_time_public),
                &source.one_time_secret,
                0,
            )?
            .into_iter()
            .next()?;
    }
    let spend_signature =
        oracle.generate_signature(&digest, &keys.address.spend, &keys.spend_secret)?;

    Some(encode_reserve_proof(
        &ReserveProof {
            entries,
            spend_signature,
        },
        currency,
    ))
}

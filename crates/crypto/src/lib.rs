//! Cryptographic oracle: the seam between consensus validation and the
//! curve/hash primitives.
//!
//! Consensus code never touches curve algebra directly; it goes through
//! [`CryptoOracle`], which keeps the expensive primitives swappable and
//! testable. The default implementation lives in [`dalek`].

mod dalek;

pub use dalek::DalekOracle;

use ssix_primitives::types::{Hash, KeyImage, PublicKey, SecretKey, Signature};

/// Pure cryptographic operations consumed by validation.
///
/// Every method is total: malformed input yields `false`/`None`, never a
/// panic, so the consensus path cannot be crashed by wire data.
pub trait CryptoOracle: Send + Sync {
    /// Keccak-256 over arbitrary bytes.
    fn fast_hash(&self, data: &[u8]) -> Hash;

    /// Slow hash used by the proof-of-work check. The memory-hard function
    /// sits behind this seam.
    fn pow_hash(&self, data: &[u8]) -> Hash;

    /// Whether the bytes name a valid curve point.
    fn check_key(&self, key: &PublicKey) -> bool;

    /// `secret · point`, used for proof shared secrets.
    fn scalar_mult_key(&self, point: &PublicKey, secret: &SecretKey) -> Option<PublicKey>;

    /// Key image of the one-time key pair: `secret · Hp(public)`.
    fn generate_key_image(&self, public: &PublicKey, secret: &SecretKey) -> Option<KeyImage>;

    /// One-time output key for the recipient: `Hs(r·V ‖ index)·G + S`.
    fn derive_one_time_key(
        &self,
        tx_secret: &SecretKey,
        view_public: &PublicKey,
        spend_public: &PublicKey,
        output_index: u64,
    ) -> Option<PublicKey>;

    /// Plain signature over `prefix_hash`; the wallet-facing proof surface
    /// signs with this.
    fn generate_signature(
        &self,
        prefix_hash: &Hash,
        public: &PublicKey,
        secret: &SecretKey,
    ) -> Option<Signature>;

    /// Plain signature check over `prefix_hash` by `public`.
    fn check_signature(&self, prefix_hash: &Hash, public: &PublicKey, signature: &Signature)
        -> bool;

    /// Ring signature over `prefix_hash` with the true signer at
    /// `secret_index`; returns one signature per ring member.
    fn generate_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        secret: &SecretKey,
        secret_index: usize,
    ) -> Option<Vec<Signature>>;

    /// Ring signature check: one signature per ring member, key image binds
    /// the hidden signer.
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;
}

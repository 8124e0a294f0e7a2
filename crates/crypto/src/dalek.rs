//! Default oracle over curve25519-dalek.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{Identity, VartimeMultiscalarMul};
use rand::rngs::OsRng;

use ssix_primitives::hash::cn_fast_hash;
use ssix_primitives::types::{Hash, KeyImage, PublicKey, SecretKey, Signature};

use crate::CryptoOracle;

#[derive(Clone, Copy, Debug, Default)]
pub struct DalekOracle;

impl DalekOracle {
    pub fn new() -> Self {
        Self
    }

    /// Fresh keypair; used by the template/test surface, not validation.
    pub fn generate_keys(&self) -> (PublicKey, SecretKey) {
        let secret = Scalar::random(&mut OsRng);
        let public = EdwardsPoint::mul_base(&secret).compress();
        (PublicKey(public.to_bytes()), SecretKey(secret.to_bytes()))
    }
}

impl CryptoOracle for DalekOracle {
    fn generate_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        secret: &SecretKey,
        secret_index: usize,
    ) -> Option<Vec<Signature>> {
        if secret_index >= ring.len() {
            return None;
        }
        let secret_scalar = decode_scalar(secret.as_bytes())?;
        let image = decode_point(key_image.as_bytes())?;

        let mut challenges = vec![Scalar::ZERO; ring.len()];
        let mut responses = vec![Scalar::ZERO; ring.len()];
        let mut buf: Vec<u8> = Vec::with_capacity(32 + ring.len() * 64);
        buf.extend_from_slice(prefix_hash.as_bytes());

        let mut k = Scalar::ZERO;
        for (i, member) in ring.iter().enumerate() {
            let member_point = decode_point(member.as_bytes())?;
            let base = hash_to_point(member.as_bytes());
            let (left, right) = if i == secret_index {
                k = Scalar::random(&mut OsRng);
                (EdwardsPoint::mul_base(&k), base * k)
            } else {
                challenges[i] = Scalar::random(&mut OsRng);
                responses[i] = Scalar::random(&mut OsRng);
                let left = EdwardsPoint::vartime_double_scalar_mul_basepoint(
                    &challenges[i],
                    &member_point,
                    &responses[i],
                );
                let right = EdwardsPoint::vartime_multiscalar_mul(
                    [responses[i], challenges[i]],
                    [base, image],
                );
                (left, right)
            };
            buf.extend_from_slice(left.compress().as_bytes());
            buf.extend_from_slice(right.compress().as_bytes());
        }

        let total = hash_to_scalar(&buf);
        let mut others = Scalar::ZERO;
        for (i, c) in challenges.iter().enumerate() {
            if i != secret_index {
                others += c;
            }
        }
        challenges[secret_index] = total - others;
        responses[secret_index] = k - challenges[secret_index] * secret_scalar;

        Some(
            challenges
                .iter()
                .zip(responses.iter())
                .map(|(c, r)| pack_signature(c, r))
                .collect(),
        )
    }

    fn fast_hash(&self, data: &[u8]) -> Hash {
        cn_fast_hash(data)
    }

    fn pow_hash(&self, data: &[u8]) -> Hash {
        // Memory-hard function seam; the node treats whatever sits here as
        // an opaque digest of the hashing blob.
        cn_fast_hash(data)
    }

    fn check_key(&self, key: &PublicKey) -> bool {
        decode_point(key.as_bytes()).is_some()
    }

    fn scalar_mult_key(&self, point: &PublicKey, secret: &SecretKey) -> Option<PublicKey> {
        let point = decode_point(point.as_bytes())?;
        let scalar = decode_scalar(secret.as_bytes())?;
        Some(PublicKey((point * scalar).compress().to_bytes()))
    }

    fn generate_key_image(&self, public: &PublicKey, secret: &SecretKey) -> Option<KeyImage> {
        decode_point(public.as_bytes())?;
        let scalar = decode_scalar(secret.as_bytes())?;
        let image = hash_to_point(public.as_bytes()) * scalar;
        Some(KeyImage(image.compress().to_bytes()))
    }

    fn derive_one_time_key(
        &self,
        tx_secret: &SecretKey,
        view_public: &PublicKey,
        spend_public: &PublicKey,
        output_index: u64,
    ) -> Option<PublicKey> {
        let r = decode_scalar(tx_secret.as_bytes())?;
        let view = decode_point(view_public.as_bytes())?;
        let spend = decode_point(spend_public.as_bytes())?;

        let shared = (view * r).compress();
        let mut buf = Vec::with_capacity(42);
        buf.extend_from_slice(shared.as_bytes());
        let mut index = output_index;
        while index >= 0x80 {
            buf.push((index as u8 & 0x7f) | 0x80);
            index >>= 7;
        }
        buf.push(index as u8);

        let derived = EdwardsPoint::mul_base(&hash_to_scalar(&buf)) + spend;
        Some(PublicKey(derived.compress().to_bytes()))
    }

    fn generate_signature(
        &self,
        prefix_hash: &Hash,
        public: &PublicKey,
        secret: &SecretKey,
    ) -> Option<Signature> {
        let secret = decode_scalar(secret.as_bytes())?;
        let k = Scalar::random(&mut OsRng);
        let commitment = EdwardsPoint::mul_base(&k).compress();
        let c = challenge(&[
            prefix_hash.as_bytes(),
            public.as_bytes(),
            commitment.as_bytes(),
        ]);
        let r = k - c * secret;
        Some(pack_signature(&c, &r))
    }

    fn check_signature(
        &self,
        prefix_hash: &Hash,
        public: &PublicKey,
        signature: &Signature,
    ) -> bool {
        let Some(point) = decode_point(public.as_bytes()) else {
            return false;
        };
        let Some((c, r)) = unpack_signature(signature) else {
            return false;
        };
        let commitment =
            EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &point, &r).compress();
        let expected = challenge(&[
            prefix_hash.as_bytes(),
            public.as_bytes(),
            commitment.as_bytes(),
        ]);
        expected == c
    }

    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        if ring.is_empty() || ring.len() != signatures.len() {
            return false;
        }
        let Some(image) = decode_point(key_image.as_bytes()) else {
            return false;
        };
        // A small-order component in the image would let one output yield
        // several distinct accepted images.
        if !image.is_torsion_free() {
            return false;
        }

        let mut buf: Vec<u8> = Vec::with_capacity(32 + ring.len() * 64);
        buf.extend_from_slice(prefix_hash.as_bytes());
        let mut sum = Scalar::ZERO;

        for (member, signature) in ring.iter().zip(signatures.iter()) {
            let Some(member_point) = decode_point(member.as_bytes()) else {
                return false;
            };
            let Some((c, r)) = unpack_signature(signature) else {
                return false;
            };
            let base = hash_to_point(member.as_bytes());
            let left = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &member_point, &r);
            let right = EdwardsPoint::vartime_multiscalar_mul([r, c], [base, image]);
            buf.extend_from_slice(left.compress().as_bytes());
            buf.extend_from_slice(right.compress().as_bytes());
            sum += c;
        }

        hash_to_scalar(&buf) == sum
    }
}

fn decode_point(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
    CompressedEdwardsY(*bytes).decompress()
}

fn decode_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(cn_fast_hash(data).0)
}

fn challenge(parts: &[&[u8]]) -> Scalar {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        buf.extend_from_slice(part);
    }
    hash_to_scalar(&buf)
}

/// Deterministic hash-to-point: iterate the digest until it decompresses,
/// then clear the cofactor so the result lies in the prime-order subgroup.
fn hash_to_point(data: &[u8]) -> EdwardsPoint {
    let mut digest = cn_fast_hash(data);
    loop {
        if let Some(point) = CompressedEdwardsY(digest.0).decompress() {
            let cleared = point.mul_by_cofactor();
            if cleared != EdwardsPoint::identity() {
                return cleared;
            }
        }
        digest = cn_fast_hash(digest.as_bytes());
    }
}

fn pack_signature(c: &Scalar, r: &Scalar) -> Signature {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&c.to_bytes());
    out[32..].copy_from_slice(&r.to_bytes());
    Signature(out)
}

fn unpack_signature(signature: &Signature) -> Option<(Scalar, Scalar)> {
    let bytes = signature.as_bytes();
    let mut c = [0u8; 32];
    let mut r = [0u8; 32];
    c.copy_from_slice(&bytes[..32]);
    r.copy_from_slice(&bytes[32..]);
    Some((
        Option::from(Scalar::from_canonical_bytes(c))?,
        Option::from(Scalar::from_canonical_bytes(r))?,
    ))
}

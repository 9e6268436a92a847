//! Local signing of legacy (EIP-155) Ethereum transactions.

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::{HarnessError, Result};

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Generate a random secp256k1 key.
pub fn random_signing_key() -> Result<SigningKey> {
    // a random 32-byte string is a valid scalar with overwhelming probability
    for _ in 0..8 {
        let bytes = rand::random::<[u8; 32]>();
        if let Ok(key) = SigningKey::from_slice(&bytes) {
            return Ok(key);
        }
    }
    Err(HarnessError::invalid_data(
        "signing key",
        "failed to generate a valid secp256k1 key",
    ))
}

/// `0x`-prefixed address of `key`.
pub fn address_of(key: &SigningKey) -> String {
    let point = key.verifying_key().as_affine().to_encoded_point(false);
    // skip the 0x04 uncompressed prefix
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Decode a `0x`-prefixed (or bare) hex string.
pub fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| HarnessError::invalid_data(field, e.to_string()))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(field: &str, value: &str) -> Result<u128> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| HarnessError::invalid_data(field, e.to_string()))
}

/// Render a quantity as `0x`-prefixed hex.
pub fn to_quantity(value: u128) -> String {
    format!("{:#x}", value)
}

/// A pre-EIP-1559 transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTransaction {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient, `None` for contract creation.
    pub to: Option<[u8; 20]>,
    /// Value in wei.
    pub value: u128,
    /// Call data or init code.
    pub data: Vec<u8>,
    /// EIP-155 chain id.
    pub chain_id: u64,
}

impl LegacyTransaction {
    /// RLP payload hashed for signing (EIP-155).
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(self.chain_id as u128));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    /// Sign with `key` and return the raw transaction bytes.
    pub fn sign(&self, key: &SigningKey) -> Result<Vec<u8>> {
        let hash = keccak256(&self.signing_payload());
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| HarnessError::invalid_data("signature", e.to_string()))?;

        let v = self.chain_id as u128 * 2 + 35 + recovery_id.to_byte() as u128;
        let bytes = signature.to_bytes();
        let (r, s) = bytes.split_at(32);

        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_bytes(strip_leading_zeros(r)));
        fields.push(rlp::encode_bytes(strip_leading_zeros(s)));
        Ok(rlp::encode_list(&fields))
    }

    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(self.nonce as u128),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(self.gas_limit as u128),
            rlp::encode_bytes(self.to.as_ref().map(|to| &to[..]).unwrap_or(&[])),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }
}

/// Parse a `0x`-prefixed 20-byte address.
pub fn parse_address(value: &str) -> Result<[u8; 20]> {
    let bytes = decode_hex("address", value)?;
    bytes
        .try_into()
        .map_err(|_| HarnessError::invalid_data("address", format!("{} is not 20 bytes", value)))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Recursive length prefix encoding, just enough for transactions.
pub mod rlp {
    /// Encode a byte string.
    pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        if bytes.len() == 1 && bytes[0] < 0x80 {
            return bytes.to_vec();
        }
        let mut out = length_prefix(bytes.len(), 0x80);
        out.extend_from_slice(bytes);
        out
    }

    /// Encode an unsigned integer as its minimal big-endian byte string.
    pub fn encode_uint(value: u128) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        encode_bytes(super::strip_leading_zeros(&bytes))
    }

    /// Encode a list of already encoded items.
    pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
        let len = items.iter().map(Vec::len).sum();
        let mut out = length_prefix(len, 0xc0);
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }

    fn length_prefix(len: usize, offset: u8) -> Vec<u8> {
        if len < 56 {
            return vec![offset + len as u8];
        }
        let len_bytes = (len as u64).to_be_bytes();
        let len_bytes = super::strip_leading_zeros(&len_bytes);
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(len_bytes);
        out
    }
}

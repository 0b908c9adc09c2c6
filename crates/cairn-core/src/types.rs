//! Ledger types pushed to the indexer: blocks, transactions, enrollments,
//! pre-images.
//!
//! All types deserialize from the JSON wire format the upstream node pushes.
//! Hashes travel as lowercase hex strings; byte vectors (signatures,
//! payloads, validator bitmasks) likewise.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::PayloadError;

/// A 32-byte hash value.
///
/// Used for block hashes, transaction hashes, merkle roots, UTXO keys,
/// enrollment commitments, and pre-images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as the genesis previous hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Lowercase hex encoding of the hash.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hash from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, PayloadError> {
        let bytes = hex::decode(s)
            .map_err(|e| PayloadError::Encoding(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PayloadError::Encoding("hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Serde adapter encoding `Vec<u8>` fields as hex strings.
pub mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}

/// Derive the UTXO key for an output: `SHA-256(tx_hash || index_le)`.
///
/// Row presence under this key in the UTXO table means the output is
/// unspent; deleting the row spends it.
pub fn utxo_key(tx_hash: &Hash256, index: u64) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(tx_hash.as_bytes());
    hasher.update(index.to_le_bytes());
    Hash256(hasher.finalize().into())
}

/// Transaction kind.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Ordinary value transfer.
    #[default]
    Payment,
    /// Freezes its outputs as validator stake.
    Freeze,
    /// Block reward; no inputs.
    Coinbase,
}

impl TxType {
    /// Stable numeric encoding for persistence.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Payment => 0,
            Self::Freeze => 1,
            Self::Coinbase => 2,
        }
    }

    /// Decode the persisted numeric form.
    pub fn from_u8(v: u8) -> Result<Self, PayloadError> {
        match v {
            0 => Ok(Self::Payment),
            1 => Ok(Self::Freeze),
            2 => Ok(Self::Coinbase),
            other => Err(PayloadError::Encoding(format!("unknown tx type {other}"))),
        }
    }
}

/// A transaction input, spending a previous output by its UTXO key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// Key of the UTXO being spent.
    pub utxo: Hash256,
    /// Unlock witness (signature bytes). Opaque to the indexer.
    #[serde(with = "hex_bytes", default)]
    pub unlock: Vec<u8>,
}

/// A transaction output, creating a new UTXO.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Output value in the smallest unit.
    pub value: u64,
    /// Hash of the receiving address' lock script.
    pub address: Hash256,
}

/// A ledger transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction kind.
    #[serde(rename = "type", default)]
    pub tx_type: TxType,
    /// Inputs consuming previous outputs. Empty for coinbase.
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    /// Outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Opaque application payload.
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Compute the transaction hash (SHA-256 over a fixed byte layout).
    ///
    /// Layout: type byte, then each input (utxo key, unlock length LE,
    /// unlock bytes), then each output (value LE, address), then payload.
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update([self.tx_type.as_u8()]);
        for input in &self.inputs {
            hasher.update(input.utxo.as_bytes());
            hasher.update((input.unlock.len() as u64).to_le_bytes());
            hasher.update(&input.unlock);
        }
        for output in &self.outputs {
            hasher.update(output.value.to_le_bytes());
            hasher.update(output.address.as_bytes());
        }
        hasher.update(&self.payload);
        Hash256(hasher.finalize().into())
    }

    /// Check if this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Serialized size in bytes of the canonical JSON form.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// A validator enrollment carried in a block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Enrollment {
    /// Key of the frozen stake UTXO.
    pub utxo_key: Hash256,
    /// Commitment: the seed of the validator's pre-image hash chain.
    pub commitment: Hash256,
    /// Length of the validation cycle in blocks.
    pub cycle_length: u64,
    /// Enrollment signature. Opaque to the indexer.
    #[serde(with = "hex_bytes", default)]
    pub enroll_sig: Vec<u8>,
}

/// A pre-image revealed by a validator between blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PreImage {
    /// Key of the enrollment's stake UTXO.
    pub utxo_key: Hash256,
    /// Height the pre-image is revealed for.
    pub height: u64,
    /// The revealed hash.
    pub hash: Hash256,
}

/// Block header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block height, monotonic and unique.
    pub height: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// Merkle root of the block's transaction hashes.
    pub merkle_root: Hash256,
    /// Bitmask of validators that signed the block.
    #[serde(with = "hex_bytes", default)]
    pub validators: Vec<u8>,
    /// Multi-signature over the header.
    #[serde(with = "hex_bytes", default)]
    pub signature: Vec<u8>,
    /// Random seed derived from revealed pre-images.
    #[serde(default)]
    pub random_seed: Hash256,
    /// Seconds since the genesis timestamp.
    #[serde(default)]
    pub time_offset: u64,
}

impl BlockHeader {
    /// Compute the block header hash (SHA-256 over a fixed byte layout).
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.merkle_root.as_bytes());
        hasher.update((self.validators.len() as u64).to_le_bytes());
        hasher.update(&self.validators);
        hasher.update(&self.signature);
        hasher.update(self.random_seed.as_bytes());
        hasher.update(self.time_offset.to_le_bytes());
        Hash256(hasher.finalize().into())
    }
}

/// A complete block: header, transactions, and enrollments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Ordered list of transactions.
    pub transactions: Vec<Transaction>,
    /// Validator enrollments activated by this block.
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
}

impl Block {
    /// Hashes of all transactions, in block order.
    pub fn tx_hashes(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::hash).collect()
    }
}

/// Extract the height from a raw block payload without a full parse.
///
/// The queue needs the height before deciding whether to parse and persist,
/// recover, or drop the payload. A missing header or height field is a
/// malformed payload.
pub fn header_height(raw: &serde_json::Value) -> Result<u64, PayloadError> {
    raw.get("header")
        .and_then(|h| h.get("height"))
        .and_then(serde_json::Value::as_u64)
        .ok_or(PayloadError::MissingHeight)
}

//! Composite keys and the key serializer / encryption seams.
//!
//! Index keys are ordered tuples of [`KeyItem`]s. A tree is configured with a
//! fixed arity; probe keys with fewer items than the arity are completed with
//! the `AlwaysLess` / `AlwaysGreater` sentinels depending on which range
//! boundary is being searched. Sentinels are only ever part of probe keys,
//! never of stored keys.

use crate::error::{Result, RidgelineError};
use std::cmp::Ordering;

/// One item of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyItem {
    /// Sentinel that sorts below every other item.
    AlwaysLess,
    /// Signed 64-bit integer item.
    Int(i64),
    /// UTF-8 string item.
    Str(String),
    /// Opaque byte-string item.
    Bytes(Vec<u8>),
    /// Sentinel that sorts above every other item.
    AlwaysGreater,
}

impl KeyItem {
    /// Rank used to order items of different runtime types deterministically.
    fn type_rank(&self) -> u8 {
        match self {
            KeyItem::AlwaysLess => 0,
            KeyItem::Int(_) => 1,
            KeyItem::Str(_) => 2,
            KeyItem::Bytes(_) => 3,
            KeyItem::AlwaysGreater => 4,
        }
    }
}

impl Ord for KeyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyItem::Int(a), KeyItem::Int(b)) => a.cmp(b),
            (KeyItem::Str(a), KeyItem::Str(b)) => a.cmp(b),
            (KeyItem::Bytes(a), KeyItem::Bytes(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for KeyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for KeyItem {
    fn from(value: i64) -> Self {
        KeyItem::Int(value)
    }
}

impl From<&str> for KeyItem {
    fn from(value: &str) -> Self {
        KeyItem::Str(value.to_string())
    }
}

/// An ordered tuple of key items, compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    items: Vec<KeyItem>,
}

impl CompositeKey {
    /// Creates a key from its items.
    pub fn new(items: Vec<KeyItem>) -> Self {
        Self { items }
    }

    /// Creates a single-item key.
    pub fn of(item: impl Into<KeyItem>) -> Self {
        Self {
            items: vec![item.into()],
        }
    }

    /// Returns the items of this key.
    pub fn items(&self) -> &[KeyItem] {
        &self.items
    }

    /// Returns the number of items.
    pub fn arity(&self) -> usize {
        self.items.len()
    }

    /// Returns a copy of this key padded with `pad` up to `arity` items.
    ///
    /// Keys that already have `arity` or more items are returned unchanged.
    pub fn completed_to(&self, arity: usize, pad: KeyItem) -> CompositeKey {
        if self.items.len() >= arity {
            return self.clone();
        }
        let mut items = self.items.clone();
        while items.len() < arity {
            items.push(pad.clone());
        }
        CompositeKey { items }
    }
}

impl From<i64> for CompositeKey {
    fn from(value: i64) -> Self {
        CompositeKey::of(value)
    }
}

impl From<&str> for CompositeKey {
    fn from(value: &str) -> Self {
        CompositeKey::of(value)
    }
}

/// Binary codec for index keys.
///
/// The serializer id is recorded in WAL component operations so that log
/// consumers can decode key payloads.
pub trait KeySerializer: Send + Sync {
    /// Identifier of this serializer, stored in WAL records.
    fn id(&self) -> u8;

    /// Normalizes a key before comparison and storage (collation hook).
    fn preprocess(&self, key: CompositeKey) -> CompositeKey {
        key
    }

    /// Serializes a key to bytes.
    fn serialize(&self, key: &CompositeKey) -> Vec<u8>;

    /// Deserializes a key from bytes.
    fn deserialize(&self, bytes: &[u8]) -> Result<CompositeKey>;

    /// Returns the serialized size of a key without serializing it.
    fn serialized_size(&self, key: &CompositeKey) -> usize;
}

const TAG_ALWAYS_LESS: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_ALWAYS_GREATER: u8 = 255;

/// Tagged binary encoding of composite keys.
///
/// Layout: item count (u8), then per item a tag byte followed by the
/// item payload. Integers are 8 bytes little-endian; strings and byte
/// strings carry a u16 length prefix. Sentinels are tag-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositeKeySerializer;

impl CompositeKeySerializer {
    /// Serializer identifier recorded in WAL component operations.
    pub const ID: u8 = 1;
}

impl KeySerializer for CompositeKeySerializer {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn serialize(&self, key: &CompositeKey) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size(key));
        buf.push(key.items().len() as u8);
        for item in key.items() {
            match item {
                KeyItem::AlwaysLess => buf.push(TAG_ALWAYS_LESS),
                KeyItem::Int(v) => {
                    buf.push(TAG_INT);
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                KeyItem::Str(s) => {
                    buf.push(TAG_STR);
                    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
                KeyItem::Bytes(b) => {
                    buf.push(TAG_BYTES);
                    buf.extend_from_slice(&(b.len() as u16).to_le_bytes());
                    buf.extend_from_slice(b);
                }
                KeyItem::AlwaysGreater => buf.push(TAG_ALWAYS_GREATER),
            }
        }
        buf
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CompositeKey> {
        if bytes.is_empty() {
            return Err(RidgelineError::MalformedKey("empty key encoding".into()));
        }
        let count = bytes[0] as usize;
        let mut items = Vec::with_capacity(count);
        let mut pos = 1;

        for _ in 0..count {
            let tag = *bytes
                .get(pos)
                .ok_or_else(|| RidgelineError::MalformedKey("truncated item tag".into()))?;
            pos += 1;
            match tag {
                TAG_ALWAYS_LESS => items.push(KeyItem::AlwaysLess),
                TAG_ALWAYS_GREATER => items.push(KeyItem::AlwaysGreater),
                TAG_INT => {
                    let end = pos + 8;
                    let raw = bytes
                        .get(pos..end)
                        .ok_or_else(|| RidgelineError::MalformedKey("truncated integer".into()))?;
                    items.push(KeyItem::Int(i64::from_le_bytes(raw.try_into().unwrap())));
                    pos = end;
                }
                TAG_STR | TAG_BYTES => {
                    let raw_len = bytes
                        .get(pos..pos + 2)
                        .ok_or_else(|| RidgelineError::MalformedKey("truncated length".into()))?;
                    let len = u16::from_le_bytes(raw_len.try_into().unwrap()) as usize;
                    pos += 2;
                    let payload = bytes
                        .get(pos..pos + len)
                        .ok_or_else(|| RidgelineError::MalformedKey("truncated payload".into()))?;
                    pos += len;
                    if tag == TAG_STR {
                        let s = std::str::from_utf8(payload).map_err(|_| {
                            RidgelineError::MalformedKey("invalid UTF-8 in string item".into())
                        })?;
                        items.push(KeyItem::Str(s.to_string()));
                    } else {
                        items.push(KeyItem::Bytes(payload.to_vec()));
                    }
                }
                other => {
                    return Err(RidgelineError::MalformedKey(format!(
                        "unknown item tag {other}"
                    )))
                }
            }
        }

        Ok(CompositeKey::new(items))
    }

    fn serialized_size(&self, key: &CompositeKey) -> usize {
        1 + key
            .items()
            .iter()
            .map(|item| match item {
                KeyItem::AlwaysLess | KeyItem::AlwaysGreater => 1,
                KeyItem::Int(_) => 9,
                KeyItem::Str(s) => 3 + s.len(),
                KeyItem::Bytes(b) => 3 + b.len(),
            })
            .sum::<usize>()
    }
}

/// Optional key-at-rest encryption.
///
/// When configured, serialized key bytes are encrypted before they reach a
/// page and the ciphertext is stored behind a 4-byte length prefix.
pub trait Encryption: Send + Sync {
    /// Name of the encryption scheme, recorded in WAL component operations.
    fn name(&self) -> &str;

    /// Encrypts a serialized key.
    fn encrypt(&self, plain: &[u8]) -> Vec<u8>;

    /// Decrypts a stored key.
    fn decrypt(&self, cipher: &[u8]) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_item_sentinel_ordering() {
        assert!(KeyItem::AlwaysLess < KeyItem::Int(i64::MIN));
        assert!(KeyItem::AlwaysGreater > KeyItem::Int(i64::MAX));
        assert!(KeyItem::AlwaysLess < KeyItem::Str(String::new()));
        assert!(KeyItem::AlwaysGreater > KeyItem::Bytes(vec![0xFF; 8]));
    }

    #[test]
    fn test_key_item_same_type_ordering() {
        assert!(KeyItem::Int(1) < KeyItem::Int(2));
        assert!(KeyItem::Str("a".into()) < KeyItem::Str("b".into()));
        assert!(KeyItem::Bytes(vec![1]) < KeyItem::Bytes(vec![1, 0]));
    }

    #[test]
    fn test_composite_key_lexicographic_ordering() {
        let ab = CompositeKey::new(vec!["a".into(), "b".into()]);
        let ac = CompositeKey::new(vec!["a".into(), "c".into()]);
        let b = CompositeKey::new(vec![KeyItem::from("b")]);
        assert!(ab < ac);
        assert!(ac < b);
    }

    #[test]
    fn test_completed_to_pads_short_keys() {
        let key = CompositeKey::of("a");
        let low = key.completed_to(2, KeyItem::AlwaysLess);
        let high = key.completed_to(2, KeyItem::AlwaysGreater);

        assert_eq!(low.arity(), 2);
        assert_eq!(high.arity(), 2);
        assert!(low < high);

        let a1 = CompositeKey::new(vec!["a".into(), 1i64.into()]);
        assert!(low < a1);
        assert!(a1 < high);
    }

    #[test]
    fn test_completed_to_full_key_unchanged() {
        let key = CompositeKey::new(vec!["a".into(), 1i64.into()]);
        assert_eq!(key.completed_to(2, KeyItem::AlwaysLess), key);
    }

    #[test]
    fn test_serializer_roundtrip() {
        let serializer = CompositeKeySerializer;
        let key = CompositeKey::new(vec![
            KeyItem::Int(-77),
            KeyItem::Str("hello".into()),
            KeyItem::Bytes(vec![1, 2, 3]),
        ]);

        let bytes = serializer.serialize(&key);
        assert_eq!(bytes.len(), serializer.serialized_size(&key));
        assert_eq!(serializer.deserialize(&bytes).unwrap(), key);
    }

    #[test]
    fn test_serializer_roundtrip_sentinels() {
        let serializer = CompositeKeySerializer;
        let key = CompositeKey::new(vec![KeyItem::AlwaysLess, KeyItem::AlwaysGreater]);
        let bytes = serializer.serialize(&key);
        assert_eq!(serializer.deserialize(&bytes).unwrap(), key);
    }

    #[test]
    fn test_serializer_rejects_garbage() {
        let serializer = CompositeKeySerializer;
        assert!(serializer.deserialize(&[]).is_err());
        assert!(serializer.deserialize(&[1, 42]).is_err());
        assert!(serializer.deserialize(&[1, TAG_INT, 0, 0]).is_err());
    }

    #[test]
    fn test_serialized_ordering_matches_key_ordering() {
        let serializer = CompositeKeySerializer;
        let keys: Vec<CompositeKey> = (0..50).map(|i| CompositeKey::from(i as i64)).collect();
        for window in keys.windows(2) {
            let a = serializer.serialize(&window[0]);
            let b = serializer.serialize(&window[1]);
            let da = serializer.deserialize(&a).unwrap();
            let db = serializer.deserialize(&b).unwrap();
            assert!(da < db);
        }
    }
}

use serde_json::{Map, Value};

use crate::error::MuxError;

/// Opaque key/value payload carried on `START`. A thin newtype over a JSON object;
/// this crate never interprets individual keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Serializes to UTF-8 JSON. An empty map encodes to `{}`, never an empty slice,
    /// so `decode` always has well-formed input to parse back.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_else(|_| b"{}".to_vec())
    }

    /// Decodes a JSON object. Empty input decodes to an empty map.
    pub fn decode(data: &[u8]) -> Result<Self, MuxError> {
        if data.is_empty() {
            return Ok(Self::default());
        }
        let map: Map<String, Value> = serde_json::from_slice(data).map_err(MuxError::decode)?;
        Ok(Self(map))
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Handed to server-side handlers; wraps the metadata decoded from the peer's `START`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    metadata: Metadata,
}

impl Context {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut meta = Metadata::new();
        meta.insert("uuid", "abc").insert("account_id", "1675987");
        let encoded = meta.encode();
        let decoded = Metadata::decode(&encoded).unwrap();
        assert_eq!(decoded.get("uuid").unwrap(), "abc");
        assert_eq!(decoded.get("account_id").unwrap(), "1675987");
    }

    #[test]
    fn empty_input_decodes_to_empty_map() {
        let decoded = Metadata::decode(&[]).unwrap();
        assert_eq!(decoded, Metadata::default());
    }

    #[test]
    fn empty_map_encodes_to_empty_object() {
        let meta = Metadata::new();
        assert_eq!(meta.encode(), b"{}");
    }

    #[test]
    fn context_exposes_decoded_pairs() {
        let mut meta = Metadata::new();
        meta.insert("k", "v");
        let ctx = Context::new(meta);
        assert_eq!(ctx.get("k").unwrap(), "v");
        assert!(ctx.get("missing").is_none());
    }
}

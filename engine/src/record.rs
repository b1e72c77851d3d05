//! Record types for storing data.

use crate::{error::Result, ETag, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Keys owned by the store. Clients cannot set them through a payload.
pub const RESERVED_KEYS: [&str; 2] = ["id", "etag"];

/// Payload of a record: a JSON object without the reserved keys.
pub type Payload = Map<String, Value>;

/// A data record in the store.
///
/// Serialized flat, with the payload fields next to `id` and `etag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the collection
    pub id: RecordId,
    /// Content-derived version tag
    pub etag: ETag,
    /// The data fields
    #[serde(flatten)]
    pub payload: Payload,
}

impl Record {
    /// Create a record, deriving its etag from the content.
    pub fn new(id: impl Into<RecordId>, payload: Payload) -> Result<Self> {
        let id = id.into();
        let etag = compute_etag(&id, &payload)?;
        Ok(Self { id, etag, payload })
    }

    /// Build a record from a client-supplied JSON value.
    ///
    /// The value must be an object; reserved keys are dropped.
    pub fn from_value(id: impl Into<RecordId>, value: Value) -> Result<Self> {
        Self::new(id, payload_from_value(value)?)
    }

    /// Identity and version of this record.
    pub fn tag(&self) -> VersionTag {
        VersionTag {
            id: self.id.clone(),
            etag: self.etag.clone(),
        }
    }

    /// Look up a top-level field, including the reserved ones.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "etag" => Some(Value::String(self.etag.clone())),
            _ => self.payload.get(name).cloned(),
        }
    }

    /// Replace the payload and recompute the etag.
    pub fn set_payload(&mut self, payload: Payload) -> Result<()> {
        self.etag = compute_etag(&self.id, &payload)?;
        self.payload = payload;
        Ok(())
    }
}

/// Identity and version of a record, the only parts compared when diffing.
///
/// Clients hand these back as a reconnect baseline; extra fields on their
/// copies of the records are ignored when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTag {
    pub id: RecordId,
    pub etag: ETag,
}

impl VersionTag {
    pub fn new(id: impl Into<RecordId>, etag: impl Into<ETag>) -> Self {
        Self {
            id: id.into(),
            etag: etag.into(),
        }
    }
}

/// Strip reserved keys from a client value and require an object.
pub fn payload_from_value(value: Value) -> Result<Payload> {
    match value {
        Value::Object(mut obj) => {
            for key in RESERVED_KEYS {
                obj.remove(key);
            }
            Ok(obj)
        }
        other => Err(Error::InvalidPayload(format!(
            "payload must be an object, got {}",
            crate::schema::json_type_name(&other)
        ))),
    }
}

/// Apply a JSON merge patch (RFC 7386) to a payload.
///
/// `null` in the patch removes the field; nested objects merge recursively.
pub fn merge_patch(target: &mut Payload, patch: Payload) {
    for (key, value) in patch {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Null => {
                target.remove(&key);
            }
            Value::Object(inner) => {
                let slot = target
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    merge_patch(existing, inner);
                }
            }
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Derive an etag from the record id and payload.
///
/// `serde_json::Map` keeps keys sorted, so equal content hashes equally.
pub fn compute_etag(id: &str, payload: &Payload) -> Result<ETag> {
    let body = serde_json::to_vec(payload).map_err(|e| Error::Internal(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(&body);

    Ok(format!("etag:{}", hex::encode(hasher.finalize())))
}

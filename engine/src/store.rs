//! Record storage.
//!
//! [`RecordStore`] is the capability the rest of the system needs from
//! storage: point reads, query evaluation over one consistent state, and
//! conditional writes. [`MemoryStore`] implements it in memory behind a
//! single reader/writer lock, so a query never observes half of a write.

use crate::{
    error::Result,
    precondition::check_precondition,
    query::{QuerySpec, ResultSet},
    record::{merge_patch, Payload},
    CollectionName, Error, Record, RecordId, Schema,
};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage operations used by handlers and live views.
///
/// Implementations must make `query` atomic with respect to every write and
/// must run the precondition check and the mutation under the same lock.
pub trait RecordStore: Send + Sync {
    /// The schema records are validated and queried against.
    fn schema(&self) -> &Schema;

    /// Fetch one record.
    fn get(&self, collection: &str, id: &str) -> Result<Record>;

    /// Evaluate a query against a consistent snapshot of one collection.
    fn query(&self, collection: &str, spec: &QuerySpec) -> Result<ResultSet>;

    /// Insert a new record.
    fn create(&self, collection: &str, id: RecordId, payload: Payload) -> Result<Record>;

    /// Merge-patch an existing record.
    fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Payload,
        expected: Option<&str>,
    ) -> Result<Record>;

    /// Replace the payload of an existing record.
    fn replace(
        &self,
        collection: &str,
        id: &str,
        payload: Payload,
        expected: Option<&str>,
    ) -> Result<Record>;

    /// Remove a record, returning its last state.
    fn delete(&self, collection: &str, id: &str, expected: Option<&str>) -> Result<Record>;
}

/// A collection of records.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: HashMap<RecordId, Record>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Iterate over all records.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the collection has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// In-memory [`RecordStore`].
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    collections: RwLock<HashMap<CollectionName, Collection>>,
}

impl MemoryStore {
    /// Create a store with an empty collection for every schema collection.
    pub fn new(schema: Schema) -> Self {
        let collections = schema
            .collections
            .keys()
            .map(|name| (name.clone(), Collection::new()))
            .collect();

        Self {
            schema,
            collections: RwLock::new(collections),
        }
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        self.collections
            .read()
            .get(collection)
            .map(Collection::len)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
    }

    /// Validate, check the precondition and store a new payload for an
    /// existing record, all under one write lock.
    fn modify<F>(
        &self,
        collection: &str,
        id: &str,
        expected: Option<&str>,
        build: F,
    ) -> Result<Record>
    where
        F: FnOnce(&Record) -> Payload,
    {
        let schema = self.schema.collection(collection)?;
        let mut collections = self.collections.write();
        let records = &mut collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?
            .records;

        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        check_precondition(record, expected)?;

        let payload = build(record);
        schema.validate_payload(&payload)?;
        record.set_payload(payload)?;

        Ok(record.clone())
    }
}

impl RecordStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get(&self, collection: &str, id: &str) -> Result<Record> {
        self.collections
            .read()
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }

    fn query(&self, collection: &str, spec: &QuerySpec) -> Result<ResultSet> {
        let compiled = spec.compile(self.schema.collection(collection)?)?;

        let collections = self.collections.read();
        let records = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        Ok(compiled.run(records.records()))
    }

    fn create(&self, collection: &str, id: RecordId, payload: Payload) -> Result<Record> {
        self.schema.collection(collection)?.validate_payload(&payload)?;
        let record = Record::new(id, payload)?;

        let mut collections = self.collections.write();
        let records = &mut collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?
            .records;

        if records.contains_key(&record.id) {
            return Err(Error::RecordAlreadyExists(record.id));
        }
        records.insert(record.id.clone(), record.clone());

        Ok(record)
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Payload,
        expected: Option<&str>,
    ) -> Result<Record> {
        self.modify(collection, id, expected, |current| {
            let mut payload = current.payload.clone();
            merge_patch(&mut payload, patch);
            payload
        })
    }

    fn replace(
        &self,
        collection: &str,
        id: &str,
        payload: Payload,
        expected: Option<&str>,
    ) -> Result<Record> {
        self.modify(collection, id, expected, |_| payload)
    }

    fn delete(&self, collection: &str, id: &str, expected: Option<&str>) -> Result<Record> {
        let mut collections = self.collections.write();
        let records = &mut collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?
            .records;

        let record = records
            .get(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        check_precondition(record, expected)?;

        records
            .remove(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterOp, Sort};
    use crate::record::payload_from_value;
    use crate::schema::{CollectionSchema, FieldDef, FieldType};
    use serde_json::{json, Value};

    fn test_schema() -> Schema {
        Schema::new(1).with_collection(CollectionSchema::new(
            "users",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("age", FieldType::Int),
            ],
        ))
    }

    fn test_store() -> MemoryStore {
        MemoryStore::new(test_schema())
    }

    fn payload(value: Value) -> Payload {
        payload_from_value(value).unwrap()
    }

    #[test]
    fn create_store() {
        let store = test_store();
        assert_eq!(store.count("users").unwrap(), 0);
        assert!(matches!(store.count("posts"), Err(Error::CollectionNotFound(_))));
    }

    #[test]
    fn create_and_get() {
        let store = test_store();
        let created = store
            .create("users", "user-1".into(), payload(json!({"name": "Alice"})))
            .unwrap();

        let fetched = store.get("users", "user-1").unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.payload["name"], "Alice");
    }

    #[test]
    fn create_duplicate() {
        let store = test_store();
        store
            .create("users", "user-1".into(), payload(json!({"name": "Alice"})))
            .unwrap();

        let result = store.create("users", "user-1".into(), payload(json!({"name": "Bob"})));
        assert!(matches!(result, Err(Error::RecordAlreadyExists(_))));
    }

    #[test]
    fn create_validates_schema() {
        let store = test_store();
        let result = store.create("users", "user-1".into(), payload(json!({"age": 3})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
        assert_eq!(store.count("users").unwrap(), 0);
    }

    #[test]
    fn update_merges_fields() {
        let store = test_store();
        store
            .create("users", "u".into(), payload(json!({"name": "Alice", "age": 30})))
            .unwrap();

        let updated = store
            .update("users", "u", payload(json!({"name": "Alicia"})), None)
            .unwrap();

        assert_eq!(updated.payload["name"], "Alicia");
        assert_eq!(updated.payload["age"], 30);
    }

    #[test]
    fn replace_drops_fields() {
        let store = test_store();
        store
            .create("users", "u".into(), payload(json!({"name": "Alice", "age": 30})))
            .unwrap();

        let replaced = store
            .replace("users", "u", payload(json!({"name": "Bob"})), None)
            .unwrap();

        assert_eq!(replaced.payload["name"], "Bob");
        assert!(!replaced.payload.contains_key("age"));
    }

    #[test]
    fn update_version_mismatch() {
        let store = test_store();
        let created = store
            .create("users", "u".into(), payload(json!({"name": "Alice"})))
            .unwrap();
        store
            .update("users", "u", payload(json!({"name": "Bob"})), None)
            .unwrap();

        let result = store.update(
            "users",
            "u",
            payload(json!({"name": "Carol"})),
            Some(created.etag.as_str()),
        );
        assert!(matches!(result, Err(Error::VersionMismatch { .. })));
        assert_eq!(store.get("users", "u").unwrap().payload["name"], "Bob");
    }

    #[test]
    fn conditional_update_advances_etag() {
        let store = test_store();
        let created = store
            .create("users", "u".into(), payload(json!({"name": "Alice"})))
            .unwrap();

        let updated = store
            .update("users", "u", payload(json!({"name": "Bob"})), Some(created.etag.as_str()))
            .unwrap();
        assert_ne!(updated.etag, created.etag);
    }

    #[test]
    fn invalid_update_leaves_record() {
        let store = test_store();
        let created = store
            .create("users", "u".into(), payload(json!({"name": "Alice"})))
            .unwrap();

        let result = store.update("users", "u", payload(json!({"age": "old"})), None);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert_eq!(store.get("users", "u").unwrap(), created);
    }

    #[test]
    fn delete_with_precondition() {
        let store = test_store();
        let created = store
            .create("users", "u".into(), payload(json!({"name": "Alice"})))
            .unwrap();

        assert!(matches!(
            store.delete("users", "u", Some("etag:nope")),
            Err(Error::VersionMismatch { .. })
        ));
        assert!(store.get("users", "u").is_ok());

        let deleted = store.delete("users", "u", Some(created.etag.as_str())).unwrap();
        assert_eq!(deleted.id, "u");
        assert!(matches!(store.get("users", "u"), Err(Error::RecordNotFound(_))));
        assert!(matches!(
            store.delete("users", "u", None),
            Err(Error::RecordNotFound(_))
        ));
    }

    #[test]
    fn record_not_found() {
        let store = test_store();
        assert!(matches!(store.get("users", "nope"), Err(Error::RecordNotFound(_))));
        assert!(matches!(
            store.update("users", "nope", Payload::new(), None),
            Err(Error::RecordNotFound(_))
        ));
    }

    #[test]
    fn query_filters_and_sorts() {
        let store = test_store();
        for (id, name, age) in [("1", "Carol", 40), ("2", "Alice", 30), ("3", "Bob", 30)] {
            store
                .create("users", id.into(), payload(json!({"name": name, "age": age})))
                .unwrap();
        }

        let spec = QuerySpec::new()
            .filter("age", FilterOp::Eq, "30")
            .sort(Sort::asc("name"));
        let result = store.query("users", &spec).unwrap();
        let names: Vec<_> = result.iter().map(|r| r.payload["name"].clone()).collect();
        assert_eq!(names, vec![json!("Alice"), json!("Bob")]);
    }

    #[test]
    fn query_errors() {
        let store = test_store();
        assert!(matches!(
            store.query("posts", &QuerySpec::new()),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.query("users", &QuerySpec::new().sort(Sort::asc("email"))),
            Err(Error::UnknownPath(_))
        ));
    }
}

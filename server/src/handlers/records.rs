//! Record handlers.
//!
//! Every successful write publishes a change event after the store has
//! committed it. Rejected writes publish nothing.

use liveset_engine::record::payload_from_value;
use liveset_engine::{ChangeEvent, ChangeKind, QuerySpec, Record, ResultSet};
use serde_json::Value;

use crate::error::Result;
use crate::AppState;

fn publish(state: &AppState, collection: &str, record: &Record, kind: ChangeKind) {
    state
        .notifier
        .publish(ChangeEvent::new(collection, record.id.as_str(), kind));
}

/// Create a record with a server-assigned id.
pub fn create_record(state: &AppState, collection: &str, body: Value) -> Result<Record> {
    let payload = payload_from_value(body)?;
    let id = uuid::Uuid::new_v4().to_string();

    let record = state.store.create(collection, id, payload)?;
    tracing::debug!(collection = %collection, id = %record.id, etag = %record.etag, "Record created");

    publish(state, collection, &record, ChangeKind::Created);
    Ok(record)
}

/// Fetch one record.
pub fn get_record(state: &AppState, collection: &str, id: &str) -> Result<Record> {
    Ok(state.store.get(collection, id)?)
}

/// Evaluate a list query once.
pub fn list_records(
    state: &AppState,
    collection: &str,
    params: &[(String, String)],
) -> Result<ResultSet> {
    let spec = QuerySpec::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    Ok(state.store.query(collection, &spec)?)
}

/// Merge-patch a record.
pub fn update_record(
    state: &AppState,
    collection: &str,
    id: &str,
    body: Value,
    expected: Option<&str>,
) -> Result<Record> {
    let patch = payload_from_value(body)?;

    let record = state.store.update(collection, id, patch, expected)?;
    tracing::debug!(collection = %collection, id = %id, etag = %record.etag, "Record updated");

    publish(state, collection, &record, ChangeKind::Updated);
    Ok(record)
}

/// Replace a record's payload.
pub fn replace_record(
    state: &AppState,
    collection: &str,
    id: &str,
    body: Value,
    expected: Option<&str>,
) -> Result<Record> {
    let payload = payload_from_value(body)?;

    let record = state.store.replace(collection, id, payload, expected)?;
    tracing::debug!(collection = %collection, id = %id, etag = %record.etag, "Record replaced");

    publish(state, collection, &record, ChangeKind::Replaced);
    Ok(record)
}

/// Delete a record.
pub fn delete_record(
    state: &AppState,
    collection: &str,
    id: &str,
    expected: Option<&str>,
) -> Result<Record> {
    let record = state.store.delete(collection, id, expected)?;
    tracing::debug!(collection = %collection, id = %id, "Record deleted");

    publish(state, collection, &record, ChangeKind::Deleted);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;
    use crate::test_support::test_state;
    use liveset_engine::Error as EngineError;
    use serde_json::json;

    use crate::error::AppError;

    #[tokio::test]
    async fn test_write_publishes_change() {
        let state = test_state();
        let mut listener = state.notifier.subscribe("todos");

        let record = create_record(&state, "todos", json!({"text": "foo"})).unwrap();
        assert_eq!(
            listener.recv().await,
            Some(Notification::Change(ChangeEvent::new(
                "todos",
                record.id.as_str(),
                ChangeKind::Created
            )))
        );

        update_record(&state, "todos", &record.id, json!({"done": true}), None).unwrap();
        assert!(matches!(
            listener.recv().await,
            Some(Notification::Change(ChangeEvent { kind: ChangeKind::Updated, .. }))
        ));

        delete_record(&state, "todos", &record.id, None).unwrap();
        assert!(matches!(
            listener.recv().await,
            Some(Notification::Change(ChangeEvent { kind: ChangeKind::Deleted, .. }))
        ));
    }

    #[tokio::test]
    async fn test_rejected_write_publishes_nothing() {
        let state = test_state();
        let record = create_record(&state, "todos", json!({"text": "foo"})).unwrap();
        let mut listener = state.notifier.subscribe("todos");

        let result = update_record(
            &state,
            "todos",
            &record.id,
            json!({"text": "bar"}),
            Some("etag:stale"),
        );
        assert!(matches!(
            result,
            Err(AppError::Engine(EngineError::VersionMismatch { .. }))
        ));

        let result = create_record(&state, "todos", json!({"done": true}));
        assert!(result.is_err());

        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), listener.recv())
            .await
            .is_err());
    }

    #[test]
    fn test_update_merges_and_replace_drops() {
        let state = test_state();
        let record = create_record(&state, "todos", json!({"text": "foo", "rank": 1})).unwrap();

        let updated = update_record(&state, "todos", &record.id, json!({"done": true}), None).unwrap();
        assert_eq!(updated.payload["rank"], 1);
        assert_eq!(updated.payload["done"], true);

        let replaced = replace_record(&state, "todos", &record.id, json!({"text": "bar"}), None).unwrap();
        assert!(!replaced.payload.contains_key("rank"));
        assert!(!replaced.payload.contains_key("done"));
    }

    #[test]
    fn test_list_applies_query() {
        let state = test_state();
        for (text, rank) in [("a", 3), ("b", 1), ("c", 2)] {
            create_record(&state, "todos", json!({"text": text, "rank": rank})).unwrap();
        }

        let params = vec![
            ("_sort".to_string(), "-rank".to_string()),
            ("_limit".to_string(), "2".to_string()),
        ];
        let records = list_records(&state, "todos", &params).unwrap();
        let texts: Vec<&str> = records
            .iter()
            .map(|r| r.payload["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["a", "c"]);
    }
}

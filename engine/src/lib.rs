//! # Liveset Engine
//!
//! Core logic for live query subscriptions over JSON record collections.
//!
//! The engine evaluates filtered, sorted, limited queries, computes minimal
//! list diffs, guards conditional writes and tracks what each live view last
//! emitted. It performs no IO and never blocks on anything but its own store
//! lock; transports and timers live in the server.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an id, a content-derived etag and a JSON object payload.
//! Two records with the same id and payload always carry the same etag.
//!
//! ### Queries
//!
//! A [`QuerySpec`] holds filters, sort keys, offset and limit. It is
//! compiled against a [`CollectionSchema`] so every path is checked before
//! any record is visited.
//!
//! ### Diffs
//!
//! [`diff`](diff::diff) turns the id/etag list a client holds and a freshly
//! evaluated list into [`DiffOp`]s; [`apply`](diff::apply) replays them.
//!
//! ### Live views
//!
//! [`ListView`] and [`RecordView`] remember the last emission and decide
//! whether a fresh evaluation is worth sending.
//!
//! ## Quick Start
//!
//! ```rust
//! use liveset_engine::{
//!     CollectionSchema, FieldDef, FieldType, ListView, MemoryStore, QuerySpec,
//!     RecordStore, Schema, Sort, StreamMessage, StreamMode,
//! };
//! use liveset_engine::record::payload_from_value;
//! use serde_json::json;
//!
//! // 1. Define a schema
//! let schema = Schema::new(1).with_collection(CollectionSchema::new(
//!     "items",
//!     vec![FieldDef::required("text", FieldType::String)],
//! ));
//!
//! // 2. Create a store and write a record
//! let store = MemoryStore::new(schema);
//! let payload = payload_from_value(json!({"text": "foo"})).unwrap();
//! store.create("items", "a".to_string(), payload).unwrap();
//!
//! // 3. Open a live view and feed it an evaluation
//! let spec = QuerySpec::new().sort(Sort::asc("text")).limit(10);
//! let mut view = ListView::new("items", spec.clone(), StreamMode::Full, None);
//! let message = view.refresh(store.query("items", &spec).unwrap());
//! assert!(matches!(message, Some(StreamMessage::Snapshot { .. })));
//! ```

pub mod diff;
pub mod error;
pub mod path;
pub mod precondition;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod view;

// Re-export main types at crate root
pub use diff::DiffOp;
pub use error::Error;
pub use path::Path;
pub use precondition::{check_precondition, parse_if_match};
pub use query::{evaluate, tags_of, CompiledQuery, Direction, Filter, FilterOp, QuerySpec, ResultSet, Sort};
pub use record::{Payload, Record, VersionTag};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};
pub use store::{Collection, MemoryStore, RecordStore};
pub use view::{ChangeEvent, ChangeKind, ListView, RecordView, StreamMessage, StreamMode, ViewState};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type ETag = String;
pub type SchemaVersion = u32;

//! Live views.
//!
//! A live view is the state a subscription keeps between evaluations: what it
//! last sent to the client. The owner re-evaluates the query whenever a
//! relevant change happens and hands the fresh result to [`ListView::refresh`]
//! or [`RecordView::refresh`], which decide whether and what to emit.
//!
//! Nothing in here blocks or performs IO; the async session loop lives in the
//! server.

use crate::{
    diff::{diff, DiffOp},
    error::Result,
    query::{tags_of, QuerySpec, ResultSet},
    CollectionName, Error, ETag, Record, RecordId, VersionTag,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Replaced,
    Deleted,
}

/// Notification that a record changed. Carries no record data: views always
/// re-read current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: CollectionName,
    pub id: RecordId,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(collection: impl Into<CollectionName>, id: impl Into<RecordId>, kind: ChangeKind) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            kind,
        }
    }
}

/// Payload mode of a list stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Every emission is the whole list
    #[default]
    Full,
    /// Emissions are operations relative to the previous emission
    Diff,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Full => "full",
            StreamMode::Diff => "diff",
        }
    }
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(StreamMode::Full),
            "diff" => Ok(StreamMode::Diff),
            other => Err(Error::InvalidQuery(format!("unknown stream format: {}", other))),
        }
    }
}

/// One message on a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// The complete current list
    Snapshot { records: Vec<Record> },
    /// The client's baseline already equals the current list
    NotModified,
    /// Operations relative to the previous emission
    Diff { ops: Vec<DiffOp> },
    /// Current state of a single watched record
    Record { record: Record },
    /// Keep-alive
    Heartbeat,
    /// The stream failed and is about to close
    Error { message: String },
}

impl StreamMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error {
            message: message.into(),
        }
    }

    /// Name of the message type, as used for event names on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Snapshot { .. } => "snapshot",
            StreamMessage::NotModified => "not_modified",
            StreamMessage::Diff { .. } => "diff",
            StreamMessage::Record { .. } => "record",
            StreamMessage::Heartbeat => "heartbeat",
            StreamMessage::Error { .. } => "error",
        }
    }
}

/// Lifecycle of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Nothing emitted yet
    Initializing,
    /// At least one emission made
    Streaming,
    /// No further emissions
    Closed,
}

/// Live view over a filtered, sorted, limited list.
#[derive(Debug, Clone)]
pub struct ListView {
    collection: CollectionName,
    spec: QuerySpec,
    mode: StreamMode,
    baseline_supplied: bool,
    last_emitted: Vec<VersionTag>,
    state: ViewState,
}

impl ListView {
    /// Create a view. `baseline` is the list the client already holds, if
    /// it is resuming; otherwise the baseline is empty.
    pub fn new(
        collection: impl Into<CollectionName>,
        spec: QuerySpec,
        mode: StreamMode,
        baseline: Option<Vec<VersionTag>>,
    ) -> Self {
        Self {
            collection: collection.into(),
            spec,
            mode,
            baseline_supplied: baseline.is_some(),
            last_emitted: baseline.unwrap_or_default(),
            state: ViewState::Initializing,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Identity and version of what the client currently holds.
    pub fn last_emitted(&self) -> &[VersionTag] {
        &self.last_emitted
    }

    /// Whether `event` can change this view's result.
    ///
    /// Only deletions of records the view does not hold are skipped, and only
    /// without an offset: with an offset, removing an earlier record shifts
    /// the window. Everything else may move a record into or out of scope, so
    /// the decision is left to the result comparison in [`refresh`].
    ///
    /// [`refresh`]: ListView::refresh
    pub fn is_relevant(&self, event: &ChangeEvent) -> bool {
        if self.state == ViewState::Closed || event.collection != self.collection {
            return false;
        }

        match event.kind {
            ChangeKind::Deleted if self.spec.offset == 0 => {
                self.last_emitted.iter().any(|t| t.id == event.id)
            }
            _ => true,
        }
    }

    /// Feed a fresh evaluation of the query.
    ///
    /// The first call always emits. Later calls emit only when the list
    /// differs from the last emission by id, version or order.
    pub fn refresh(&mut self, current: ResultSet) -> Option<StreamMessage> {
        let tags = tags_of(&current);

        let message = match self.state {
            ViewState::Closed => return None,
            ViewState::Streaming if tags == self.last_emitted => return None,
            ViewState::Initializing
                if self.mode == StreamMode::Full
                    && self.baseline_supplied
                    && tags == self.last_emitted =>
            {
                StreamMessage::NotModified
            }
            _ => match self.mode {
                StreamMode::Full => StreamMessage::Snapshot { records: current },
                StreamMode::Diff => StreamMessage::Diff {
                    ops: diff(&self.last_emitted, &current),
                },
            },
        };

        self.last_emitted = tags;
        self.state = ViewState::Streaming;
        Some(message)
    }

    /// Stop emitting.
    pub fn close(&mut self) {
        self.state = ViewState::Closed;
    }
}

/// Live view over one record.
#[derive(Debug, Clone)]
pub struct RecordView {
    collection: CollectionName,
    id: RecordId,
    last_etag: Option<ETag>,
    state: ViewState,
}

impl RecordView {
    pub fn new(collection: impl Into<CollectionName>, id: impl Into<RecordId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            last_etag: None,
            state: ViewState::Initializing,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn is_relevant(&self, event: &ChangeEvent) -> bool {
        self.state != ViewState::Closed
            && event.collection == self.collection
            && event.id == self.id
    }

    /// Feed the current state of the record.
    ///
    /// A missing record closes the view with `RecordNotFound`.
    pub fn refresh(&mut self, current: Option<Record>) -> Result<Option<StreamMessage>> {
        if self.state == ViewState::Closed {
            return Ok(None);
        }

        let Some(record) = current else {
            self.state = ViewState::Closed;
            return Err(Error::RecordNotFound(self.id.clone()));
        };

        if self.last_etag.as_deref() == Some(record.etag.as_str()) {
            return Ok(None);
        }

        self.last_etag = Some(record.etag.clone());
        self.state = ViewState::Streaming;
        Ok(Some(StreamMessage::Record { record }))
    }

    pub fn close(&mut self) {
        self.state = ViewState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::payload_from_value;
    use serde_json::json;

    fn rec(id: &str, text: &str) -> Record {
        Record::new(id, payload_from_value(json!({"text": text})).unwrap()).unwrap()
    }

    #[test]
    fn full_mode_first_refresh_is_snapshot() {
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Full, None);
        assert_eq!(view.state(), ViewState::Initializing);

        let msg = view.refresh(vec![]).unwrap();
        assert_eq!(msg, StreamMessage::Snapshot { records: vec![] });
        assert_eq!(view.state(), ViewState::Streaming);
    }

    #[test]
    fn unchanged_result_is_suppressed() {
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Full, None);
        view.refresh(vec![rec("a", "foo")]).unwrap();

        assert!(view.refresh(vec![rec("a", "foo")]).is_none());
        assert!(view.refresh(vec![rec("a", "bar")]).is_some());
    }

    #[test]
    fn diff_mode_emits_ops() {
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Diff, None);

        let first = view.refresh(vec![rec("a", "foo")]).unwrap();
        assert!(matches!(first, StreamMessage::Diff { ref ops } if ops.len() == 1));

        let second = view.refresh(vec![rec("a", "bar")]).unwrap();
        match second {
            StreamMessage::Diff { ops } => {
                assert!(matches!(&ops[..], [DiffOp::Update { index: 0, record }] if record.payload["text"] == "bar"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let third = view.refresh(vec![]).unwrap();
        assert_eq!(
            third,
            StreamMessage::Diff {
                ops: vec![DiffOp::Remove { id: "a".into() }]
            }
        );
    }

    #[test]
    fn empty_initial_diff_still_emits() {
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Diff, None);
        assert_eq!(view.refresh(vec![]), Some(StreamMessage::Diff { ops: vec![] }));
        assert_eq!(view.refresh(vec![]), None);
    }

    #[test]
    fn full_mode_matching_baseline_is_not_modified() {
        let current = vec![rec("a", "foo")];
        let mut view = ListView::new(
            "items",
            QuerySpec::new(),
            StreamMode::Full,
            Some(tags_of(&current)),
        );

        assert_eq!(view.refresh(current), Some(StreamMessage::NotModified));
    }

    #[test]
    fn full_mode_stale_baseline_is_snapshot() {
        let mut view = ListView::new(
            "items",
            QuerySpec::new(),
            StreamMode::Full,
            Some(vec![VersionTag::new("a", "etag:old")]),
        );

        let current = vec![rec("a", "foo"), rec("b", "bar")];
        assert_eq!(
            view.refresh(current.clone()),
            Some(StreamMessage::Snapshot { records: current })
        );
    }

    #[test]
    fn diff_mode_baseline_only_sends_changes() {
        let held = vec![rec("a", "foo")];
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Diff, Some(tags_of(&held)));

        assert_eq!(view.refresh(held.clone()), Some(StreamMessage::Diff { ops: vec![] }));

        let mut grown = held.clone();
        grown.push(rec("b", "bar"));
        match view.refresh(grown).unwrap() {
            StreamMessage::Diff { ops } => {
                assert!(matches!(&ops[..], [DiffOp::Add { index: 1, .. }]));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn relevance() {
        let mut view = ListView::new("items", QuerySpec::new().limit(1), StreamMode::Full, None);
        view.refresh(vec![rec("a", "foo")]);

        assert!(view.is_relevant(&ChangeEvent::new("items", "b", ChangeKind::Created)));
        assert!(view.is_relevant(&ChangeEvent::new("items", "b", ChangeKind::Updated)));
        assert!(view.is_relevant(&ChangeEvent::new("items", "a", ChangeKind::Deleted)));
        assert!(!view.is_relevant(&ChangeEvent::new("items", "b", ChangeKind::Deleted)));
        assert!(!view.is_relevant(&ChangeEvent::new("other", "a", ChangeKind::Updated)));

        let offset = ListView::new("items", QuerySpec::new().offset(1), StreamMode::Full, None);
        assert!(offset.is_relevant(&ChangeEvent::new("items", "z", ChangeKind::Deleted)));
    }

    #[test]
    fn closed_view_is_silent() {
        let mut view = ListView::new("items", QuerySpec::new(), StreamMode::Full, None);
        view.close();

        assert!(view.refresh(vec![rec("a", "foo")]).is_none());
        assert!(!view.is_relevant(&ChangeEvent::new("items", "a", ChangeKind::Created)));
    }

    #[test]
    fn record_view_lifecycle() {
        let mut view = RecordView::new("items", "a");
        assert!(view.is_relevant(&ChangeEvent::new("items", "a", ChangeKind::Updated)));
        assert!(!view.is_relevant(&ChangeEvent::new("items", "b", ChangeKind::Updated)));

        let first = view.refresh(Some(rec("a", "foo"))).unwrap();
        assert!(matches!(first, Some(StreamMessage::Record { .. })));
        assert_eq!(view.refresh(Some(rec("a", "foo"))).unwrap(), None);
        assert!(view.refresh(Some(rec("a", "bar"))).unwrap().is_some());

        assert!(matches!(view.refresh(None), Err(Error::RecordNotFound(id)) if id == "a"));
        assert_eq!(view.state(), ViewState::Closed);
        assert_eq!(view.refresh(Some(rec("a", "baz"))).unwrap(), None);
    }

    #[test]
    fn stream_mode_parsing() {
        assert_eq!("full".parse::<StreamMode>().unwrap(), StreamMode::Full);
        assert_eq!("diff".parse::<StreamMode>().unwrap(), StreamMode::Diff);
        assert!("delta".parse::<StreamMode>().is_err());
        assert_eq!(StreamMode::default(), StreamMode::Full);
    }

    #[test]
    fn message_wire_format() {
        let json = serde_json::to_string(&StreamMessage::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);

        let msg = StreamMessage::error("boom");
        assert_eq!(msg.kind(), "error");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""message":"boom""#));
    }
}

//! Live streams over server-sent events.
//!
//! A stream request is an ordinary list or get request with
//! `Accept: text/event-stream`. The handler validates the query up front,
//! subscribes to change events, spawns a [`Session`] and returns an SSE
//! response fed by the session's outbound channel. Every SSE event is named
//! after the message type and carries the message as JSON.

mod session;

pub use session::{Session, SessionOutcome, Subscription};

use std::collections::HashSet;
use std::convert::Infallible;

use axum::{
    http::{header::ACCEPT, HeaderMap, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::{self, Stream};
use liveset_engine::{
    Error as EngineError, ListView, QuerySpec, RecordView, StreamMessage, StreamMode, VersionTag,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::AppState;

/// Response header reporting the payload mode of a list stream.
pub const STREAM_FORMAT_HEADER: &str = "stream-format";

/// Messages buffered between a session and its SSE body.
const OUTBOUND_BUFFER: usize = 16;

/// Whether the client asked for an event stream.
pub fn wants_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// Transport parameters of a list stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub mode: StreamMode,
    pub baseline: Option<Vec<VersionTag>>,
}

impl StreamParams {
    /// Read `_stream` and `_prev`. An operator-forced format overrides the
    /// client's `_stream`.
    pub fn from_params(
        params: &[(String, String)],
        forced: Option<StreamMode>,
    ) -> std::result::Result<Self, EngineError> {
        let mut mode = StreamMode::default();
        let mut baseline = None;

        for (key, value) in params {
            match key.as_str() {
                "_stream" => mode = value.parse()?,
                "_prev" => baseline = Some(parse_prev(value)?),
                _ => {}
            }
        }

        Ok(Self {
            mode: forced.unwrap_or(mode),
            baseline,
        })
    }
}

/// Parse a client baseline: a JSON array of objects with `id` and `etag`.
/// Any other fields on the client's copies are ignored. Ids must be unique,
/// since a diff cannot address two copies of one record.
fn parse_prev(raw: &str) -> std::result::Result<Vec<VersionTag>, EngineError> {
    let tags: Vec<VersionTag> = serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidQuery(format!("invalid _prev: {}", e)))?;

    let mut seen = HashSet::with_capacity(tags.len());
    if let Some(dup) = tags.iter().find(|tag| !seen.insert(tag.id.as_str())) {
        return Err(EngineError::InvalidQuery(format!(
            "invalid _prev: duplicate id {}",
            dup.id
        )));
    }

    Ok(tags)
}

/// Open a live list stream.
pub fn open_list(
    state: &AppState,
    collection: String,
    params: &[(String, String)],
) -> Result<Response> {
    let spec = QuerySpec::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    spec.compile(state.store.schema().collection(&collection)?)?;

    let StreamParams { mode, baseline } =
        StreamParams::from_params(params, state.config.force_stream_format)?;

    tracing::debug!(
        collection = %collection,
        mode = %mode,
        resumed = baseline.is_some(),
        "Opening list stream"
    );

    let view = ListView::new(collection, spec, mode, baseline);
    let mut response = start(state, Subscription::List(view));
    response
        .headers_mut()
        .insert(STREAM_FORMAT_HEADER, HeaderValue::from_static(mode.as_str()));

    Ok(response)
}

/// Open a live stream over one record.
pub fn open_record(state: &AppState, collection: String, id: String) -> Result<Response> {
    state.store.schema().collection(&collection)?;

    tracing::debug!(collection = %collection, id = %id, "Opening record stream");

    Ok(start(state, Subscription::Record(RecordView::new(collection, id))))
}

/// Subscribe, spawn the session and wire it to an SSE body.
fn start(state: &AppState, subscription: Subscription) -> Response {
    let listener = state.notifier.subscribe(subscription.collection());

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let session = Session::new(
        subscription,
        state.store.clone(),
        listener,
        tx,
        state.config.heartbeat_interval,
        state.shutdown.child_token(),
    );

    supervise(session.id().to_string(), session.spawn());

    Sse::new(events(rx)).into_response()
}

/// Await a session and record how it ended.
fn supervise(session_id: String, handle: JoinHandle<SessionOutcome>) {
    tokio::spawn(async move {
        match handle.await {
            Ok(SessionOutcome::Failed(reason)) => {
                tracing::warn!(session_id = %session_id, reason = %reason, "Session failed");
            }
            Ok(outcome) => {
                tracing::debug!(session_id = %session_id, outcome = ?outcome, "Session finished");
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, "Session task panicked: {}", e);
            }
        }
    });
}

/// Adapt a session's outbound channel into SSE events.
fn events(rx: mpsc::Receiver<StreamMessage>) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        Some((Ok(to_event(&message)), rx))
    })
}

fn to_event(message: &StreamMessage) -> Event {
    Event::default()
        .event(message.kind())
        .json_data(message)
        .unwrap_or_else(|e| {
            tracing::error!("Failed to serialize stream message: {}", e);
            Event::default()
                .event("error")
                .data(r#"{"type":"error","message":"serialization failed"}"#)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn stream_params_defaults() {
        let parsed = StreamParams::from_params(&params(&[("text", "foo")]), None).unwrap();
        assert_eq!(parsed.mode, StreamMode::Full);
        assert!(parsed.baseline.is_none());
    }

    #[test]
    fn stream_params_prev() {
        let parsed = StreamParams::from_params(
            &params(&[
                ("_stream", "diff"),
                ("_prev", r#"[{"id":"a","etag":"etag:1","text":"ignored"}]"#),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(parsed.mode, StreamMode::Diff);
        assert_eq!(parsed.baseline, Some(vec![VersionTag::new("a", "etag:1")]));
    }

    #[test]
    fn forced_format_wins() {
        let parsed =
            StreamParams::from_params(&params(&[("_stream", "diff")]), Some(StreamMode::Full)).unwrap();
        assert_eq!(parsed.mode, StreamMode::Full);
    }

    #[test]
    fn bad_transport_params() {
        assert!(StreamParams::from_params(&params(&[("_stream", "delta")]), None).is_err());
        assert!(matches!(
            StreamParams::from_params(&params(&[("_prev", "not json")]), None),
            Err(EngineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn duplicate_prev_ids_rejected() {
        let result = StreamParams::from_params(
            &params(&[(
                "_prev",
                r#"[{"id":"a","etag":"etag:1"},{"id":"b","etag":"etag:2"},{"id":"a","etag":"etag:1"}]"#,
            )]),
            None,
        );
        assert!(matches!(result, Err(EngineError::InvalidQuery(msg)) if msg.contains("duplicate id a")));
    }

    #[test]
    fn accept_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_stream(&headers));

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!wants_stream(&headers));

        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert!(wants_stream(&headers));
    }
}

//! Change notification.
//!
//! Write handlers publish a [`ChangeEvent`](liveset_engine::ChangeEvent) after
//! every successful mutation; live sessions listen for events on their
//! collection and re-evaluate. Events carry no record data. A listener that
//! falls behind loses events but is told it lagged, and re-evaluates.

mod notifier;

pub use notifier::{Listener, Notification, Notifier};

//! Visitor notice bus: a trait for publishing lifecycle facts about visitors.
//!
//! The tracking engine accepts an `Arc<dyn EventSink>` and emits a
//! [`VisitorNotice`] after each successful write that created a visitor,
//! moved its status, or recorded a conversion. Downstream consumers (lead
//! routing, analytics export) subscribe by implementing the trait.

use crate::types::VisitorStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeKind {
    VisitorCreated,
    StatusChanged {
        from: VisitorStatus,
        to: VisitorStatus,
    },
    ConversionRecorded {
        lead_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitorNotice {
    pub visitor_id: String,
    pub kind: NoticeKind,
    pub timestamp: DateTime<Utc>,
}

impl VisitorNotice {
    pub fn new(visitor_id: impl Into<String>, kind: NoticeKind) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, notice: VisitorNotice);
}

/// No-op sink for tests and deployments without subscribers.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _notice: VisitorNotice) {}
}

/// In-memory sink that captures notices for testing.
#[derive(Default)]
pub struct CaptureSink {
    notices: Mutex<Vec<VisitorNotice>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<VisitorNotice> {
        self.notices.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().expect("event bus mutex poisoned").len()
    }

    /// Count notices matching a predicate on their kind.
    pub fn count_where(&self, pred: impl Fn(&NoticeKind) -> bool) -> usize {
        self.notices
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|n| pred(&n.kind))
            .count()
    }

    pub fn clear(&self) {
        self.notices.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, notice: VisitorNotice) {
        self.notices
            .lock()
            .expect("event bus mutex poisoned")
            .push(notice);
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

//! Debounce buffer for in-progress form edits.
//!
//! Keystroke-level captures for the same `(visitor, form, field)` collapse
//! into one pending edit holding the latest value. An edit is released once it
//! has been quiet for the debounce window, so the visitor record sees one
//! write per settled field instead of one per keystroke.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use lead_core::events::FieldCapture;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FieldKey {
    visitor: String,
    form_id: String,
    field_name: String,
}

#[derive(Debug, Clone)]
struct PendingEdit {
    capture: FieldCapture,
    last_changed: Instant,
    edits: u32,
}

pub struct FieldCaptureBuffer {
    pending: DashMap<FieldKey, PendingEdit>,
    debounce: Duration,
}

impl FieldCaptureBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            debounce,
        }
    }

    pub fn from_millis(debounce_ms: u64) -> Self {
        Self::new(Duration::from_millis(debounce_ms))
    }

    /// Buffer an edit, replacing any pending value for the same field and
    /// restarting its quiet period. Edits without an identity are dropped.
    pub fn record(&self, capture: FieldCapture, now: Instant) -> bool {
        let Some(visitor) = capture.identity.lock_key() else {
            return false;
        };
        let key = FieldKey {
            visitor,
            form_id: capture.form_id.clone(),
            field_name: capture.field_name.clone(),
        };
        self.pending
            .entry(key)
            .and_modify(|edit| {
                edit.capture = capture.clone();
                edit.last_changed = now;
                edit.edits += 1;
            })
            .or_insert_with(|| PendingEdit {
                capture: capture.clone(),
                last_changed: now,
                edits: 1,
            });
        true
    }

    /// Remove and return edits that have been quiet for the debounce window.
    pub fn drain_ready(&self, now: Instant) -> Vec<FieldCapture> {
        let ready: Vec<FieldKey> = self
            .pending
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_changed) >= self.debounce)
            .map(|entry| entry.key().clone())
            .collect();

        let mut drained = Vec::with_capacity(ready.len());
        for key in ready {
            // Re-check under the shard lock: the field may have been edited
            // again since the scan.
            if let Some((_, edit)) = self.pending.remove_if(&key, |_, edit| {
                now.saturating_duration_since(edit.last_changed) >= self.debounce
            }) {
                debug!(
                    form_id = %edit.capture.form_id,
                    field = %edit.capture.field_name,
                    collapsed = edit.edits,
                    "field edit settled"
                );
                drained.push(edit.capture);
            }
        }
        drained
    }

    /// Remove and return everything, settled or not.
    pub fn drain_all(&self) -> Vec<FieldCapture> {
        let keys: Vec<FieldKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|(_, edit)| edit.capture))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

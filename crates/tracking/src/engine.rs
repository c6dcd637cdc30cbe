//! Tracking engine: runs the resolve → aggregate → score → transition →
//! persist cycle for each inbound event.
//!
//! Writes for one identity key are serialized through [`KeyedLocks`]; the
//! store's versioned save catches the remaining races (for example one event
//! keyed by visitor id and another keyed only by the same visitor's
//! fingerprint). A conflicting save re-runs the whole cycle against the
//! freshly loaded record, up to `max_write_attempts` times.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lead_cache::{NoScoreCache, ScoreCache};
use lead_core::config::TrackingConfig;
use lead_core::error::{TrackingError, TrackingResult};
use lead_core::event_bus::{EventSink, NoticeKind, VisitorNotice};
use lead_core::events::{FieldCapture, TrackingEvent};
use lead_core::types::{ScoreSnapshot, Visitor, VisitorStatus};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::aggregator;
use crate::conversion::{self, ConversionOutcome, LeadLink};
use crate::field_capture::FieldCaptureBuffer;
use crate::identity::IdentityResolver;
use crate::locks::KeyedLocks;
use crate::scoring;
use crate::status::{self, Transition};
use crate::store::{StoreError, VisitorStore};

/// Caller-set consent flags. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentUpdate {
    pub marketing: Option<bool>,
    pub gdpr: Option<bool>,
}

/// Summary of one field-buffer flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

/// Result of one successful write cycle.
struct Committed {
    visitor: Visitor,
    created: bool,
    transitions: Vec<Transition>,
}

pub struct TrackingEngine {
    store: Arc<dyn VisitorStore>,
    resolver: IdentityResolver,
    locks: KeyedLocks,
    score_cache: Arc<dyn ScoreCache>,
    event_sink: Arc<dyn EventSink>,
    max_write_attempts: u32,
}

impl TrackingEngine {
    pub fn new(store: Arc<dyn VisitorStore>, config: &TrackingConfig) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone())
                .with_fingerprint_matching(config.fingerprint_matching),
            store,
            locks: KeyedLocks::new(),
            score_cache: Arc::new(NoScoreCache),
            event_sink: lead_core::event_bus::noop_sink(),
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Attach a score cache that receives a snapshot after every save.
    pub fn with_score_cache(mut self, cache: Arc<dyn ScoreCache>) -> Self {
        self.score_cache = cache;
        self
    }

    /// Attach an event sink for visitor lifecycle notices.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Fold one tracking event into its visitor and persist the result.
    pub fn process(&self, event: &TrackingEvent) -> TrackingResult<Visitor> {
        let kind = event.kind();
        let identity = event.identity();
        if event.requires_existing_visitor() && identity.is_empty() {
            metrics::counter!("tracking.invalid_events").increment(1);
            return Err(TrackingError::InvalidEvent(format!(
                "{} event requires a visitorId or fingerprint",
                kind.as_str()
            )));
        }

        let committed = self.write_cycle(
            identity.lock_key(),
            |now| match event {
                TrackingEvent::PageView(view) => {
                    let resolution =
                        self.resolver
                            .resolve(&view.identity, view.ip_address.as_deref(), now)?;
                    Ok((resolution.visitor, resolution.created))
                }
                _ => Ok((self.resolver.find_existing(identity)?, false)),
            },
            |visitor, now| {
                let outcome = aggregator::apply(visitor, event, now);
                scoring::rescore(visitor, now);
                status::evaluate(visitor, &outcome)
            },
        )?;

        metrics::counter!("tracking.events", "kind" => kind.as_str()).increment(1);
        debug!(
            visitor_id = %committed.visitor.visitor_id,
            kind = kind.as_str(),
            engagement = committed.visitor.behavior.engagement_score,
            lead_score = committed.visitor.behavior.lead_score,
            "event applied"
        );
        self.publish(&committed);
        Ok(committed.visitor)
    }

    /// Link a newly created lead back to its visitor. Best effort: failures
    /// are logged and reported as [`ConversionOutcome::Skipped`].
    pub fn link_conversion(&self, link: &LeadLink) -> ConversionOutcome {
        if link.visitor_id.is_empty() {
            return ConversionOutcome::Skipped {
                reason: "lead carries no visitor id".to_string(),
            };
        }

        let result = self.mutate_existing(&link.visitor_id, |visitor, now| {
            let mut transitions: Vec<Transition> =
                conversion::apply_lead_link(visitor, link, now).into_iter().collect();
            scoring::rescore(visitor, now);
            // Lead-submitted contact details can also identify the visitor.
            transitions.extend(status::on_contact_captured(visitor));
            transitions
        });

        match result {
            Ok(committed) => {
                metrics::counter!("tracking.conversions.linked").increment(1);
                info!(
                    visitor_id = %link.visitor_id,
                    lead_id = %link.lead_id,
                    "lead linked to visitor"
                );
                self.publish(&committed);
                self.event_sink.emit(VisitorNotice::new(
                    committed.visitor.visitor_id.clone(),
                    NoticeKind::ConversionRecorded {
                        lead_id: link.lead_id.clone(),
                    },
                ));
                ConversionOutcome::Linked {
                    snapshot: committed.visitor.score_snapshot(),
                }
            }
            Err(e) => {
                metrics::counter!("tracking.conversions.failed").increment(1);
                warn!(
                    visitor_id = %link.visitor_id,
                    lead_id = %link.lead_id,
                    error = %e,
                    "failed to link lead to visitor"
                );
                ConversionOutcome::Skipped {
                    reason: e.code().to_string(),
                }
            }
        }
    }

    /// Record caller-supplied consent flags.
    pub fn update_consent(
        &self,
        visitor_id: &str,
        update: &ConsentUpdate,
    ) -> TrackingResult<Visitor> {
        let committed = self.mutate_existing(visitor_id, |visitor, now| {
            if let Some(marketing) = update.marketing {
                visitor.marketing_consent = marketing;
            }
            if let Some(gdpr) = update.gdpr {
                visitor.gdpr_consent.granted = gdpr;
                visitor.gdpr_consent.recorded_at = Some(now);
            }
            Vec::new()
        })?;
        info!(visitor_id = %visitor_id, "consent updated");
        Ok(committed.visitor)
    }

    /// Administrative status change, the only path that may move backwards.
    pub fn override_status(
        &self,
        visitor_id: &str,
        target: VisitorStatus,
    ) -> TrackingResult<Visitor> {
        let committed = self.mutate_existing(visitor_id, |visitor, _| {
            status::override_status(visitor, target).into_iter().collect()
        })?;
        for t in committed.transitions.iter().filter(|t| t.is_regression()) {
            warn!(
                visitor_id = %visitor_id,
                from = %t.from,
                to = %t.to,
                "visitor status moved backwards by override"
            );
        }
        self.publish(&committed);
        Ok(committed.visitor)
    }

    pub fn get_visitor(&self, visitor_id: &str) -> TrackingResult<Visitor> {
        self.resolver.find_by_id(visitor_id)
    }

    /// Current scores, served from the cache when possible.
    pub fn score(&self, visitor_id: &str) -> TrackingResult<ScoreSnapshot> {
        if let Some(snapshot) = self.score_cache.get(visitor_id) {
            return Ok(snapshot);
        }
        let snapshot = self.get_visitor(visitor_id)?.score_snapshot();
        self.score_cache.put(visitor_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Feed settled field edits into the engine. Failures are logged and
    /// the edit is dropped.
    pub fn flush_field_captures(&self, buffer: &FieldCaptureBuffer, now: Instant) -> FlushReport {
        self.apply_field_captures(buffer.drain_ready(now))
    }

    /// Feed every buffered edit into the engine regardless of debounce.
    pub fn flush_all_field_captures(&self, buffer: &FieldCaptureBuffer) -> FlushReport {
        self.apply_field_captures(buffer.drain_all())
    }

    fn apply_field_captures(&self, captures: Vec<FieldCapture>) -> FlushReport {
        let mut report = FlushReport::default();
        for capture in captures {
            let event = TrackingEvent::FieldCapture(capture);
            match self.process(&event) {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "dropping buffered field capture");
                }
            }
        }
        report
    }

    fn mutate_existing<M>(&self, visitor_id: &str, mutate: M) -> TrackingResult<Committed>
    where
        M: Fn(&mut Visitor, DateTime<Utc>) -> Vec<Transition>,
    {
        self.write_cycle(
            Some(format!("id:{visitor_id}")),
            |_| Ok((self.resolver.find_by_id(visitor_id)?, false)),
            mutate,
        )
    }

    /// Load, mutate and save under the identity's lock, retrying the full
    /// cycle on write conflicts.
    fn write_cycle<L, M>(
        &self,
        lock_key: Option<String>,
        load: L,
        mutate: M,
    ) -> TrackingResult<Committed>
    where
        L: Fn(DateTime<Utc>) -> TrackingResult<(Visitor, bool)>,
        M: Fn(&mut Visitor, DateTime<Utc>) -> Vec<Transition>,
    {
        let run = || -> TrackingResult<Committed> {
            let mut last_id = String::new();
            for attempt in 1..=self.max_write_attempts {
                let now = Utc::now();
                let (mut visitor, created) = load(now)?;
                let transitions = mutate(&mut visitor, now);
                visitor.updated_at = now;
                last_id.clone_from(&visitor.visitor_id);

                match self.store.save(&visitor) {
                    Ok(version) => {
                        visitor.version = version;
                        return Ok(Committed {
                            visitor,
                            created,
                            transitions,
                        });
                    }
                    Err(StoreError::Conflict) => {
                        metrics::counter!("tracking.write_conflicts").increment(1);
                        debug!(
                            visitor_id = %visitor.visitor_id,
                            attempt = attempt,
                            "write conflict, retrying"
                        );
                    }
                    Err(StoreError::Unavailable(reason)) => {
                        return Err(TrackingError::Storage(reason));
                    }
                }
            }
            warn!(
                visitor_id = %last_id,
                attempts = self.max_write_attempts,
                "giving up after repeated write conflicts"
            );
            Err(TrackingError::PersistenceConflict {
                visitor_id: last_id,
                attempts: self.max_write_attempts,
            })
        };

        match lock_key {
            Some(key) => self.locks.with_lock(&key, run),
            None => run(),
        }
    }

    /// Refresh the score cache and emit lifecycle notices for a commit.
    fn publish(&self, committed: &Committed) {
        let visitor = &committed.visitor;
        self.score_cache
            .put(&visitor.visitor_id, visitor.score_snapshot());

        if committed.created {
            metrics::counter!("tracking.visitors.created").increment(1);
            info!(
                visitor_id = %visitor.visitor_id,
                "visitor created"
            );
            self.event_sink.emit(VisitorNotice::new(
                visitor.visitor_id.clone(),
                NoticeKind::VisitorCreated,
            ));
        }

        for t in &committed.transitions {
            metrics::counter!("tracking.status_transitions", "to" => t.to.as_str()).increment(1);
            info!(
                visitor_id = %visitor.visitor_id,
                from = %t.from,
                to = %t.to,
                "visitor status changed"
            );
            self.event_sink.emit(VisitorNotice::new(
                visitor.visitor_id.clone(),
                NoticeKind::StatusChanged {
                    from: t.from,
                    to: t.to,
                },
            ));
        }
    }
}

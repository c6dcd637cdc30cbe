//! Identity resolution: maps an inbound event's declared visitor id and/or
//! device fingerprint onto the canonical [`Visitor`] record.
//!
//! Lookup order is exact visitor id first (authoritative), then fingerprint
//! (first registered visitor wins), then creation. Resolution never fails for
//! lack of a match; only storage errors propagate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lead_core::error::{TrackingError, TrackingResult};
use lead_core::events::VisitorIdentity;
use lead_core::types::Visitor;
use rand::RngCore;
use tracing::debug;

use crate::store::{StoreError, VisitorStore};

/// Outcome of a load-or-create resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub visitor: Visitor,
    pub created: bool,
    pub matched_by: MatchKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey {
    VisitorId,
    Fingerprint,
    Created,
}

pub struct IdentityResolver {
    store: Arc<dyn VisitorStore>,
    fingerprint_matching: bool,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn VisitorStore>) -> Self {
        Self {
            store,
            fingerprint_matching: true,
        }
    }

    /// Disable (or re-enable) the fingerprint fallback. With it off, only an
    /// exact visitor-id match resolves to an existing record.
    pub fn with_fingerprint_matching(mut self, enabled: bool) -> Self {
        self.fingerprint_matching = enabled;
        self
    }

    /// Load-or-create. Existing visitors get their visit bookkeeping updated:
    /// `last_visit = now`, `total_visits += 1`, and the IP address replaced.
    pub fn resolve(
        &self,
        identity: &VisitorIdentity,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> TrackingResult<Resolution> {
        if let Some((mut visitor, matched_by)) = self.lookup(identity)? {
            visitor.last_visit = now;
            visitor.total_visits = visitor.total_visits.saturating_add(1);
            if let Some(ip) = ip_address.filter(|ip| !ip.is_empty()) {
                visitor.ip_address = Some(ip.to_string());
            }
            return Ok(Resolution {
                visitor,
                created: false,
                matched_by,
            });
        }

        let visitor_id = identity
            .visitor_id()
            .map(str::to_string)
            .unwrap_or_else(|| generate_visitor_id(now));
        let fingerprint = identity
            .fingerprint()
            .map(str::to_string)
            .unwrap_or_else(generate_fingerprint);

        let mut visitor = Visitor::new(visitor_id, fingerprint, now);
        visitor.ip_address = ip_address.filter(|ip| !ip.is_empty()).map(str::to_string);
        debug!(visitor_id = %visitor.visitor_id, "no identity match, creating visitor");

        Ok(Resolution {
            visitor,
            created: true,
            matched_by: MatchKey::Created,
        })
    }

    /// Lookup without creation or visit bookkeeping, for event kinds that
    /// require a visitor already on record.
    pub fn find_existing(&self, identity: &VisitorIdentity) -> TrackingResult<Visitor> {
        if identity.is_empty() {
            return Err(TrackingError::InvalidEvent(
                "event requires a visitorId or fingerprint".to_string(),
            ));
        }
        match self.lookup(identity)? {
            Some((visitor, _)) => Ok(visitor),
            None => Err(TrackingError::VisitorNotFound(
                identity
                    .visitor_id()
                    .or(identity.fingerprint())
                    .unwrap_or_default()
                    .to_string(),
            )),
        }
    }

    /// Load by exact visitor id only.
    pub fn find_by_id(&self, visitor_id: &str) -> TrackingResult<Visitor> {
        self.store
            .load_by_id(visitor_id)
            .map_err(storage_error)?
            .ok_or_else(|| TrackingError::VisitorNotFound(visitor_id.to_string()))
    }

    fn lookup(&self, identity: &VisitorIdentity) -> TrackingResult<Option<(Visitor, MatchKey)>> {
        if let Some(id) = identity.visitor_id() {
            if let Some(visitor) = self.store.load_by_id(id).map_err(storage_error)? {
                return Ok(Some((visitor, MatchKey::VisitorId)));
            }
        }
        if self.fingerprint_matching {
            if let Some(fp) = identity.fingerprint() {
                if let Some(visitor) = self.store.load_by_fingerprint(fp).map_err(storage_error)? {
                    debug!(
                        visitor_id = %visitor.visitor_id,
                        "visitor matched by fingerprint"
                    );
                    return Ok(Some((visitor, MatchKey::Fingerprint)));
                }
            }
        }
        Ok(None)
    }
}

/// `visitor_<unix millis>_<8 hex chars>`.
pub fn generate_visitor_id(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("visitor_{}_{}", now.timestamp_millis(), hex::encode(bytes))
}

/// Random 16-byte hex fallback for clients that sent no fingerprint.
pub fn generate_fingerprint() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn storage_error(err: StoreError) -> TrackingError {
    TrackingError::Storage(err.to_string())
}

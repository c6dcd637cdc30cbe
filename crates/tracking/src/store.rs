//! Visitor persistence seam.
//!
//! The engine only needs keyed loads and a versioned save. Production
//! deployments back [`VisitorStore`] with a document store; the bundled
//! [`InMemoryVisitorStore`] provides the same semantics for development and
//! testing.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lead_core::types::Visitor;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The stored version no longer matches the version that was loaded.
    #[error("write conflict")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait VisitorStore: Send + Sync {
    fn load_by_id(&self, visitor_id: &str) -> Result<Option<Visitor>, StoreError>;

    /// First visitor registered with this fingerprint, if any.
    fn load_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Visitor>, StoreError>;

    /// Versioned write. Accepts the record only when the stored version equals
    /// `visitor.version` (zero meaning "must not exist yet") and returns the
    /// new version.
    fn save(&self, visitor: &Visitor) -> Result<u64, StoreError>;
}

/// Thread-safe in-memory visitor store backed by DashMap.
#[derive(Default)]
pub struct InMemoryVisitorStore {
    visitors: DashMap<String, Visitor>,
    /// fingerprint -> visitor id of the first visitor saved with it.
    fingerprints: DashMap<String, String>,
}

impl InMemoryVisitorStore {
    pub fn new() -> Self {
        info!("Visitor store initialized (in-memory, development mode)");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    pub fn list(&self) -> Vec<Visitor> {
        let mut visitors: Vec<Visitor> = self.visitors.iter().map(|r| r.value().clone()).collect();
        visitors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        visitors
    }
}

impl VisitorStore for InMemoryVisitorStore {
    fn load_by_id(&self, visitor_id: &str) -> Result<Option<Visitor>, StoreError> {
        Ok(self.visitors.get(visitor_id).map(|r| r.value().clone()))
    }

    fn load_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Visitor>, StoreError> {
        let Some(visitor_id) = self.fingerprints.get(fingerprint).map(|r| r.value().clone())
        else {
            return Ok(None);
        };
        self.load_by_id(&visitor_id)
    }

    fn save(&self, visitor: &Visitor) -> Result<u64, StoreError> {
        let new_version = match self.visitors.entry(visitor.visitor_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().version != visitor.version {
                    return Err(StoreError::Conflict);
                }
                let mut stored = visitor.clone();
                stored.version = visitor.version + 1;
                entry.insert(stored);
                visitor.version + 1
            }
            Entry::Vacant(entry) => {
                // A non-zero version for a missing record means it was removed
                // underneath us.
                if visitor.version != 0 {
                    return Err(StoreError::Conflict);
                }
                let mut stored = visitor.clone();
                stored.version = 1;
                entry.insert(stored);
                1
            }
        };

        if !visitor.fingerprint.is_empty() {
            self.fingerprints
                .entry(visitor.fingerprint.clone())
                .or_insert_with(|| visitor.visitor_id.clone());
        }
        Ok(new_version)
    }
}

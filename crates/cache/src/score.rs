//! Score cache seam. The tracking engine writes a fresh [`ScoreSnapshot`]
//! through this trait after every successful save; read paths consult it
//! before loading the full visitor record.

use lead_core::types::ScoreSnapshot;

pub trait ScoreCache: Send + Sync {
    fn get(&self, visitor_id: &str) -> Option<ScoreSnapshot>;

    fn put(&self, visitor_id: &str, snapshot: ScoreSnapshot);
}

/// Cache that never holds anything.
pub struct NoScoreCache;

impl ScoreCache for NoScoreCache {
    fn get(&self, _visitor_id: &str) -> Option<ScoreSnapshot> {
        None
    }

    fn put(&self, _visitor_id: &str, _snapshot: ScoreSnapshot) {}
}

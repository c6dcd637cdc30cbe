#![warn(clippy::unwrap_used)]

pub mod local;
pub mod score;

pub use local::LocalCache;
pub use score::{NoScoreCache, ScoreCache};

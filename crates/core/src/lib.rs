#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod types;

pub use config::AppConfig;
pub use error::{TrackingError, TrackingResult};
pub use events::{EventKind, TrackPayload, TrackingEvent, VisitorIdentity};
pub use types::{ScoreSnapshot, Visitor, VisitorStatus};

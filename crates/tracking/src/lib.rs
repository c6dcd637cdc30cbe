//! Visitor tracking and lead scoring.
//!
//! Turns a stream of anonymous, partially identified browser events into one
//! deduplicated [`Visitor`](lead_core::types::Visitor) record per person, with
//! engagement and lead scores and a forward-only lifecycle status.
//!
//! # Modules
//!
//! - [`identity`]: visitor-id / fingerprint resolution (load-or-create)
//! - [`aggregator`]: session, page, event and form-field merges
//! - [`scoring`]: engagement and lead score recomputation
//! - [`status`]: lifecycle state machine
//! - [`conversion`]: lead write-back
//! - [`field_capture`]: debounce buffer for form edits
//! - [`store`]: persistence seam and in-memory store
//! - [`engine`]: the locked, retried read-modify-write cycle tying them together

#![warn(clippy::unwrap_used)]

pub mod aggregator;
pub mod conversion;
pub mod engine;
pub mod field_capture;
pub mod identity;
pub mod locks;
pub mod scoring;
pub mod status;
pub mod store;

pub use conversion::{ConversionOutcome, LeadLink};
pub use engine::{ConsentUpdate, FlushReport, TrackingEngine};
pub use field_capture::FieldCaptureBuffer;
pub use identity::IdentityResolver;
pub use store::{InMemoryVisitorStore, StoreError, VisitorStore};

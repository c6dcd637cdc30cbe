//! Visitor lifecycle: anonymous → identified → prospect → lead → customer.
//!
//! Automatic transitions only move forward. A target at or below the current
//! status is a no-op. Moving backwards (or to `customer`) goes through
//! [`override_status`], the administrative path.

use lead_core::types::{Visitor, VisitorStatus};
use serde::Serialize;

use crate::aggregator::FoldOutcome;

/// Number of distinct fields a form must exceed before an identified visitor
/// counts as a prospect.
pub const PROSPECT_FIELD_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: VisitorStatus,
    pub to: VisitorStatus,
}

impl Transition {
    pub fn is_regression(&self) -> bool {
        self.to < self.from
    }
}

/// Move forward to `target` if it is later in the lifecycle.
pub fn advance(visitor: &mut Visitor, target: VisitorStatus) -> Option<Transition> {
    if target <= visitor.status {
        return None;
    }
    let transition = Transition {
        from: visitor.status,
        to: target,
    };
    visitor.status = target;
    Some(transition)
}

/// anonymous → identified once an email or phone is on record.
pub fn on_contact_captured(visitor: &mut Visitor) -> Option<Transition> {
    if !visitor.has_contact() {
        return None;
    }
    advance(visitor, VisitorStatus::Identified)
}

/// identified → prospect once a form has grown past the field threshold.
pub fn on_form_progress(visitor: &mut Visitor, form_field_count: usize) -> Option<Transition> {
    if visitor.status != VisitorStatus::Identified || form_field_count <= PROSPECT_FIELD_THRESHOLD
    {
        return None;
    }
    advance(visitor, VisitorStatus::Prospect)
}

/// Apply every behavior-driven transition triggered by one fold.
pub fn evaluate(visitor: &mut Visitor, outcome: &FoldOutcome) -> Vec<Transition> {
    let mut transitions = Vec::new();
    if outcome.contact_captured {
        transitions.extend(on_contact_captured(visitor));
    }
    if let Some(count) = outcome.form_field_count {
        transitions.extend(on_form_progress(visitor, count));
    }
    transitions
}

/// Administrative override. May move in either direction.
pub fn override_status(visitor: &mut Visitor, target: VisitorStatus) -> Option<Transition> {
    if target == visitor.status {
        return None;
    }
    let transition = Transition {
        from: visitor.status,
        to: target,
    };
    visitor.status = target;
    Some(transition)
}

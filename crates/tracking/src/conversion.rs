//! Conversion linking: write-back from the lead subsystem onto the visitor
//! that submitted the lead.

use chrono::{DateTime, Utc};
use lead_core::types::{Conversion, ConversionKind, ScoreSnapshot, Visitor, VisitorStatus};
use serde::{Deserialize, Serialize};

use crate::status::{self, Transition};

/// What the lead subsystem hands over when it creates a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadLink {
    /// Empty when the lead was submitted without a tracked visitor.
    #[serde(default)]
    pub visitor_id: String,
    #[serde(default)]
    pub lead_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// Result of a best-effort link. Never an error: lead creation must not
/// depend on whether a visitor record exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Linked { snapshot: ScoreSnapshot },
    Skipped { reason: String },
}

impl ConversionOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, ConversionOutcome::Linked { .. })
    }
}

/// Overwrite contact details with the lead's submitted values, move the
/// visitor to `lead`, and append a `lead_created` conversion.
pub fn apply_lead_link(
    visitor: &mut Visitor,
    link: &LeadLink,
    now: DateTime<Utc>,
) -> Option<Transition> {
    if let Some(email) = non_empty(&link.email) {
        visitor.email = Some(email.to_string());
    }
    if let Some(name) = non_empty(&link.name) {
        visitor.name = Some(name.to_string());
    }
    if let Some(phone) = non_empty(&link.phone) {
        visitor.phone = Some(phone.to_string());
    }

    visitor.conversions.push(Conversion {
        kind: ConversionKind::LeadCreated,
        data: serde_json::json!({ "leadId": link.lead_id }),
        timestamp: now,
    });

    status::advance(visitor, VisitorStatus::Lead)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> LeadLink {
        LeadLink {
            visitor_id: "v1".into(),
            lead_id: "lead-42".into(),
            email: Some("lead@example.com".into()),
            name: Some("Grace Hopper".into()),
            phone: Some("+1-555-0199".into()),
        }
    }

    #[test]
    fn test_lead_values_win() {
        let now = Utc::now();
        let mut v = Visitor::new("v1".into(), "fp".into(), now);
        v.email = Some("typed@example.com".into());
        v.name = Some("G".into());

        let t = apply_lead_link(&mut v, &link(), now).unwrap();
        assert_eq!(t.from, VisitorStatus::Anonymous);
        assert_eq!(v.status, VisitorStatus::Lead);
        assert_eq!(v.email.as_deref(), Some("lead@example.com"));
        assert_eq!(v.name.as_deref(), Some("Grace Hopper"));
        assert_eq!(v.phone.as_deref(), Some("+1-555-0199"));

        assert_eq!(v.conversions.len(), 1);
        assert_eq!(v.conversions[0].kind, ConversionKind::LeadCreated);
        assert_eq!(v.conversions[0].data["leadId"], "lead-42");
    }

    #[test]
    fn test_missing_lead_values_keep_captured_ones() {
        let now = Utc::now();
        let mut v = Visitor::new("v1".into(), "fp".into(), now);
        v.phone = Some("+1-555-0100".into());
        let mut l = link();
        l.phone = None;
        apply_lead_link(&mut v, &l, now);
        assert_eq!(v.phone.as_deref(), Some("+1-555-0100"));
    }

    #[test]
    fn test_link_without_visitor_deserializes() {
        let l: LeadLink =
            serde_json::from_str(r#"{"leadId":"lead-1","email":"a@b.co"}"#).unwrap();
        assert!(l.visitor_id.is_empty());
        assert_eq!(l.lead_id, "lead-1");
        assert_eq!(l.email.as_deref(), Some("a@b.co"));
    }

    #[test]
    fn test_customer_is_not_demoted() {
        let now = Utc::now();
        let mut v = Visitor::new("v1".into(), "fp".into(), now);
        v.status = VisitorStatus::Customer;
        assert_eq!(apply_lead_link(&mut v, &link(), now), None);
        assert_eq!(v.status, VisitorStatus::Customer);
        assert_eq!(v.conversions.len(), 1);
    }
}

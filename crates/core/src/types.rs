use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a visitor. Variant order is the forward order of the
/// lifecycle, so `Ord` comparisons express "later in the funnel".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VisitorStatus {
    #[default]
    Anonymous,
    Identified,
    Prospect,
    Lead,
    Customer,
}

impl VisitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitorStatus::Anonymous => "anonymous",
            VisitorStatus::Identified => "identified",
            VisitorStatus::Prospect => "prospect",
            VisitorStatus::Lead => "lead",
            VisitorStatus::Customer => "customer",
        }
    }
}

impl std::fmt::Display for VisitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser/device description reported by the tracking script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: Option<String>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// One browsing session. Only the active session's duration, end time and
/// bounce flag are ever updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds.
    pub duration: f64,
    pub page_views: u32,
    pub events: u32,
    pub referrer: Option<String>,
    pub bounced: bool,
}

/// Per-URL visit accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub url: String,
    pub title: Option<String>,
    pub visits: u32,
    pub total_time_spent: f64,
    pub average_time_spent: f64,
    pub last_visited: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub category: String,
    pub action: String,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    pub interacted: bool,
    pub completed: bool,
    pub last_value: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInteraction {
    pub form_id: String,
    pub fields: Vec<FormField>,
    pub started_at: DateTime<Utc>,
}

/// Kind of business-meaningful action recorded against a visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    LeadCreated,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub kind: ConversionKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Derived aggregate. Both scores are recomputed from the rest of the record
/// after every mutation and are never patched incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorSummary {
    pub total_page_views: u64,
    /// Seconds.
    pub total_time_spent: f64,
    /// Seconds.
    pub average_session_duration: f64,
    pub interests: Vec<String>,
    pub engagement_score: u8,
    pub lead_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprConsent {
    pub granted: bool,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// The canonical record for one (probable) physical visitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub visitor_id: String,
    pub fingerprint: String,

    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    pub device: Option<DeviceInfo>,
    pub location: Option<Location>,
    pub ip_address: Option<String>,

    pub sessions: Vec<SessionRecord>,
    pub pages_visited: Vec<PageVisit>,
    pub events: Vec<TrackedEvent>,
    pub form_interactions: Vec<FormInteraction>,
    pub conversions: Vec<Conversion>,
    pub behavior: BehaviorSummary,

    pub status: VisitorStatus,
    pub marketing_consent: bool,
    pub gdpr_consent: GdprConsent,

    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
    pub total_visits: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token. Zero means "never persisted".
    #[serde(default)]
    pub version: u64,
}

impl Visitor {
    /// A fresh anonymous visitor with one recorded visit.
    pub fn new(visitor_id: String, fingerprint: String, now: DateTime<Utc>) -> Self {
        Self {
            visitor_id,
            fingerprint,
            email: None,
            phone: None,
            name: None,
            first_name: None,
            last_name: None,
            device: None,
            location: None,
            ip_address: None,
            sessions: Vec::new(),
            pages_visited: Vec::new(),
            events: Vec::new(),
            form_interactions: Vec::new(),
            conversions: Vec::new(),
            behavior: BehaviorSummary::default(),
            status: VisitorStatus::Anonymous,
            marketing_consent: false,
            gdpr_consent: GdprConsent::default(),
            first_visit: now,
            last_visit: now,
            total_visits: 1,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// True once an email or phone number is on record.
    pub fn has_contact(&self) -> bool {
        is_present(&self.email) || is_present(&self.phone)
    }

    pub fn has_interest(&self, tag: &str) -> bool {
        self.behavior.interests.iter().any(|i| i == tag)
    }

    pub fn form(&self, form_id: &str) -> Option<&FormInteraction> {
        self.form_interactions.iter().find(|f| f.form_id == form_id)
    }

    pub fn score_snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            visitor_id: self.visitor_id.clone(),
            status: self.status,
            engagement_score: self.behavior.engagement_score,
            lead_score: self.behavior.lead_score,
            computed_at: self.updated_at,
        }
    }
}

/// Scores and status as published to caches and API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub visitor_id: String,
    pub status: VisitorStatus,
    pub engagement_score: u8,
    pub lead_score: u8,
    pub computed_at: DateTime<Utc>,
}

pub(crate) fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_follows_lifecycle() {
        assert!(VisitorStatus::Anonymous < VisitorStatus::Identified);
        assert!(VisitorStatus::Identified < VisitorStatus::Prospect);
        assert!(VisitorStatus::Prospect < VisitorStatus::Lead);
        assert!(VisitorStatus::Lead < VisitorStatus::Customer);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&VisitorStatus::Prospect).unwrap();
        assert_eq!(json, "\"prospect\"");
        assert_eq!(VisitorStatus::Lead.to_string(), "lead");
    }

    #[test]
    fn test_new_visitor_defaults() {
        let now = Utc::now();
        let v = Visitor::new("visitor_1".into(), "fp".into(), now);
        assert_eq!(v.total_visits, 1);
        assert_eq!(v.status, VisitorStatus::Anonymous);
        assert_eq!(v.version, 0);
        assert!(!v.has_contact());
    }

    #[test]
    fn test_empty_email_is_not_contact() {
        let mut v = Visitor::new("visitor_1".into(), "fp".into(), Utc::now());
        v.email = Some(String::new());
        assert!(!v.has_contact());
        v.phone = Some("+1-555-0100".into());
        assert!(v.has_contact());
    }
}

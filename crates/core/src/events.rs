//! Inbound tracking events.
//!
//! The tracking script posts one loosely shaped payload ([`TrackPayload`]);
//! it is narrowed into a [`TrackingEvent`] variant per endpoint so the
//! aggregator can match on the event kind exhaustively.

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};
use crate::types::{DeviceInfo, Location};

/// Correlation keys carried by every event. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorIdentity {
    pub visitor_id: Option<String>,
    pub fingerprint: Option<String>,
}

impl VisitorIdentity {
    pub fn new(visitor_id: impl Into<String>) -> Self {
        Self {
            visitor_id: Some(visitor_id.into()),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn visitor_id(&self) -> Option<&str> {
        non_empty(&self.visitor_id)
    }

    pub fn fingerprint(&self) -> Option<&str> {
        non_empty(&self.fingerprint)
    }

    pub fn is_empty(&self) -> bool {
        self.visitor_id().is_none() && self.fingerprint().is_none()
    }

    /// Key used to serialize writes for this identity.
    pub fn lock_key(&self) -> Option<String> {
        self.visitor_id()
            .map(|id| format!("id:{id}"))
            .or_else(|| self.fingerprint().map(|fp| format!("fp:{fp}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub identity: VisitorIdentity,
    pub session_id: Option<String>,
    pub referrer: Option<String>,
    pub page: PageRef,
    pub device: Option<DeviceInfo>,
    pub location: Option<Location>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub identity: VisitorIdentity,
    pub category: String,
    pub action: String,
    pub label: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identify {
    pub identity: VisitorIdentity,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCapture {
    pub identity: VisitorIdentity,
    pub form_id: String,
    pub field_name: String,
    pub field_value: String,
}

/// Time spent on a page, reported when the visitor leaves it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageExit {
    pub identity: VisitorIdentity,
    pub session_id: Option<String>,
    pub url: String,
    pub time_spent_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    PageView(PageView),
    Custom(CustomEvent),
    Identify(Identify),
    FieldCapture(FieldCapture),
    PageExit(PageExit),
}

impl TrackingEvent {
    pub fn identity(&self) -> &VisitorIdentity {
        match self {
            TrackingEvent::PageView(e) => &e.identity,
            TrackingEvent::Custom(e) => &e.identity,
            TrackingEvent::Identify(e) => &e.identity,
            TrackingEvent::FieldCapture(e) => &e.identity,
            TrackingEvent::PageExit(e) => &e.identity,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TrackingEvent::PageView(_) => EventKind::PageView,
            TrackingEvent::Custom(_) => EventKind::Custom,
            TrackingEvent::Identify(_) => EventKind::Identify,
            TrackingEvent::FieldCapture(_) => EventKind::FieldCapture,
            TrackingEvent::PageExit(_) => EventKind::PageExit,
        }
    }

    /// Page views resolve-or-create; every other kind needs a visitor on record.
    pub fn requires_existing_visitor(&self) -> bool {
        !matches!(self, TrackingEvent::PageView(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    Custom,
    Identify,
    FieldCapture,
    PageExit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Custom => "custom",
            EventKind::Identify => "identify",
            EventKind::FieldCapture => "field_capture",
            EventKind::PageExit => "page_exit",
        }
    }
}

/// Flat ingress payload as sent by the browser tracking script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPayload {
    pub visitor_id: Option<String>,
    pub fingerprint: Option<String>,
    pub session_id: Option<String>,
    pub referrer: Option<String>,
    pub page: Option<PageRef>,
    pub device: Option<String>,
    pub screen_resolution: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub ip_address: Option<String>,
    pub category: Option<String>,
    pub action: Option<String>,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub form_id: Option<String>,
    pub field_name: Option<String>,
    pub field_value: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub time_spent: Option<f64>,
}

impl TrackPayload {
    pub fn identity(&self) -> VisitorIdentity {
        VisitorIdentity {
            visitor_id: self.visitor_id.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Narrow the payload into the variant for `kind`.
    pub fn into_event(self, kind: EventKind) -> TrackingResult<TrackingEvent> {
        let identity = self.identity();
        if kind != EventKind::PageView && identity.is_empty() {
            return Err(TrackingError::InvalidEvent(format!(
                "{} event requires a visitorId or fingerprint",
                kind.as_str()
            )));
        }

        let event = match kind {
            EventKind::PageView => {
                let page = self
                    .page
                    .filter(|p| !p.url.is_empty())
                    .ok_or_else(|| missing(kind, "page.url"))?;
                let device = DeviceInfo {
                    device_type: self.device,
                    screen_resolution: self.screen_resolution,
                    language: self.language,
                    platform: self.platform,
                    user_agent: self.user_agent,
                };
                let location = Location {
                    country: self.country,
                    region: self.region,
                    city: self.city,
                };
                TrackingEvent::PageView(PageView {
                    identity,
                    session_id: self.session_id.filter(|s| !s.is_empty()),
                    referrer: self.referrer,
                    page,
                    device: (device != DeviceInfo::default()).then_some(device),
                    location: (location != Location::default()).then_some(location),
                    ip_address: self.ip_address,
                })
            }
            EventKind::Custom => TrackingEvent::Custom(CustomEvent {
                identity,
                category: required(self.category, kind, "category")?,
                action: required(self.action, kind, "action")?,
                label: self.label,
                value: self.value,
            }),
            EventKind::Identify => TrackingEvent::Identify(Identify {
                identity,
                email: self.email,
                name: self.name,
                phone: self.phone,
                first_name: self.first_name,
                last_name: self.last_name,
            }),
            EventKind::FieldCapture => TrackingEvent::FieldCapture(FieldCapture {
                identity,
                form_id: required(self.form_id, kind, "formId")?,
                field_name: required(self.field_name, kind, "fieldName")?,
                field_value: self.field_value.unwrap_or_default(),
            }),
            EventKind::PageExit => {
                let url = self
                    .page
                    .map(|p| p.url)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| missing(kind, "page.url"))?;
                let time_spent_secs = self.time_spent.unwrap_or(0.0);
                if !time_spent_secs.is_finite() || time_spent_secs < 0.0 {
                    return Err(TrackingError::InvalidEvent(
                        "timeSpent must be a non-negative number".to_string(),
                    ));
                }
                TrackingEvent::PageExit(PageExit {
                    identity,
                    session_id: self.session_id.filter(|s| !s.is_empty()),
                    url,
                    time_spent_secs,
                })
            }
        };
        Ok(event)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn required(value: Option<String>, kind: EventKind, field: &str) -> TrackingResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(kind, field))
}

fn missing(kind: EventKind, field: &str) -> TrackingError {
    TrackingError::InvalidEvent(format!("{} event is missing '{field}'", kind.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_for(visitor_id: &str) -> TrackPayload {
        TrackPayload {
            visitor_id: Some(visitor_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_treats_empty_strings_as_absent() {
        let identity = VisitorIdentity {
            visitor_id: Some(String::new()),
            fingerprint: Some(String::new()),
        };
        assert!(identity.is_empty());
        assert_eq!(identity.lock_key(), None);

        let identity = VisitorIdentity {
            visitor_id: None,
            fingerprint: Some("fp-1".into()),
        };
        assert_eq!(identity.lock_key().as_deref(), Some("fp:fp-1"));
    }

    #[test]
    fn test_page_view_without_identity_is_allowed() {
        let payload = TrackPayload {
            page: Some(PageRef {
                url: "/pricing".into(),
                title: Some("Pricing".into()),
            }),
            ..Default::default()
        };
        let event = payload.into_event(EventKind::PageView).unwrap();
        assert!(!event.requires_existing_visitor());
        assert!(event.identity().is_empty());
    }

    #[test]
    fn test_page_view_collects_device_and_location() {
        let payload = TrackPayload {
            page: Some(PageRef {
                url: "/".into(),
                title: None,
            }),
            platform: Some("MacIntel".into()),
            city: Some("Austin".into()),
            ..Default::default()
        };
        let TrackingEvent::PageView(view) = payload.into_event(EventKind::PageView).unwrap()
        else {
            panic!("expected page view");
        };
        assert_eq!(view.device.unwrap().platform.as_deref(), Some("MacIntel"));
        assert_eq!(view.location.unwrap().city.as_deref(), Some("Austin"));
    }

    #[test]
    fn test_custom_event_without_identity_is_invalid() {
        let payload = TrackPayload {
            category: Some("form".into()),
            action: Some("start".into()),
            ..Default::default()
        };
        let err = payload.into_event(EventKind::Custom).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidEvent(_)));
    }

    #[test]
    fn test_field_capture_requires_form_and_field() {
        let mut payload = payload_for("visitor_1");
        payload.form_id = Some("contact".into());
        let err = payload.clone().into_event(EventKind::FieldCapture).unwrap_err();
        assert!(err.to_string().contains("fieldName"));

        payload.field_name = Some("email".into());
        let event = payload.into_event(EventKind::FieldCapture).unwrap();
        assert_eq!(event.kind(), EventKind::FieldCapture);
    }

    #[test]
    fn test_page_exit_rejects_negative_time() {
        let mut payload = payload_for("visitor_1");
        payload.page = Some(PageRef {
            url: "/blog".into(),
            title: None,
        });
        payload.time_spent = Some(-4.0);
        assert!(payload.into_event(EventKind::PageExit).is_err());
    }
}

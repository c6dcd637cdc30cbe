//! Behavior aggregation: folds one tracking event into a visitor's session,
//! page, event and form collections.
//!
//! Each merge is idempotent with respect to the collections it keys on
//! (sessions by id, pages by URL, forms by id, fields by name). Distinct
//! events are never deduplicated. Scores are not touched here; the engine
//! recomputes them after every fold.

use chrono::{DateTime, Utc};
use lead_core::events::{CustomEvent, FieldCapture, Identify, PageExit, PageView, TrackingEvent};
use lead_core::types::{
    FormField, FormInteraction, PageVisit, SessionRecord, TrackedEvent, Visitor,
};

/// Interest tag added when a visitor starts filling in any form.
pub const FORM_INTERACTION_TAG: &str = "form-interaction";

/// Custom-event category whose label is recorded as an interest tag.
pub const INTEREST_CATEGORY: &str = "interest";

/// A session whose only page was left in under this many seconds is a bounce.
pub const BOUNCE_THRESHOLD_SECS: f64 = 10.0;

/// What a fold changed that later pipeline stages care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    /// Email or phone was written by this event.
    pub contact_captured: bool,
    /// Field count of the form touched by a field capture.
    pub form_field_count: Option<usize>,
}

/// Fold `event` into `visitor`.
pub fn apply(visitor: &mut Visitor, event: &TrackingEvent, now: DateTime<Utc>) -> FoldOutcome {
    match event {
        TrackingEvent::PageView(view) => {
            apply_page_view(visitor, view, now);
            FoldOutcome::default()
        }
        TrackingEvent::Custom(custom) => {
            append_event(visitor, custom, now);
            FoldOutcome::default()
        }
        TrackingEvent::Identify(identify) => FoldOutcome {
            contact_captured: apply_identify(visitor, identify),
            form_field_count: None,
        },
        TrackingEvent::FieldCapture(capture) => {
            let form_field_count = merge_form_field(visitor, capture, now);
            FoldOutcome {
                contact_captured: capture_identity_field(visitor, capture),
                form_field_count: Some(form_field_count),
            }
        }
        TrackingEvent::PageExit(exit) => {
            record_page_exit(visitor, exit, now);
            FoldOutcome::default()
        }
    }
}

fn apply_page_view(visitor: &mut Visitor, view: &PageView, now: DateTime<Utc>) {
    if let Some(device) = &view.device {
        visitor.device = Some(device.clone());
    }
    if let Some(location) = &view.location {
        visitor.location = Some(location.clone());
    }
    if let Some(session_id) = &view.session_id {
        merge_session(visitor, session_id, view.referrer.as_deref(), now);
    }
    merge_page(visitor, &view.page.url, view.page.title.as_deref(), now);
}

/// Append a session record the first time a session id is seen. Later page
/// views in the same session leave the record untouched.
pub fn merge_session(
    visitor: &mut Visitor,
    session_id: &str,
    referrer: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if visitor.sessions.iter().any(|s| s.session_id == session_id) {
        return false;
    }
    visitor.sessions.push(SessionRecord {
        session_id: session_id.to_string(),
        start_time: now,
        end_time: None,
        duration: 0.0,
        page_views: 1,
        events: 0,
        referrer: referrer.map(str::to_string),
        bounced: false,
    });
    true
}

/// Count a view of `url`, creating its page record if needed.
pub fn merge_page(visitor: &mut Visitor, url: &str, title: Option<&str>, now: DateTime<Utc>) {
    match visitor.pages_visited.iter_mut().find(|p| p.url == url) {
        Some(page) => {
            page.visits = page.visits.saturating_add(1);
            page.last_visited = now;
        }
        None => visitor.pages_visited.push(PageVisit {
            url: url.to_string(),
            title: title.map(str::to_string),
            visits: 1,
            total_time_spent: 0.0,
            average_time_spent: 0.0,
            last_visited: now,
        }),
    }
    visitor.behavior.total_page_views = visitor.behavior.total_page_views.saturating_add(1);
}

pub fn append_event(visitor: &mut Visitor, event: &CustomEvent, now: DateTime<Utc>) {
    visitor.events.push(TrackedEvent {
        category: event.category.clone(),
        action: event.action.clone(),
        label: event.label.clone(),
        value: event.value,
        timestamp: now,
    });

    if event.category == "form" && event.action == "start" {
        add_interest(visitor, FORM_INTERACTION_TAG);
    }
    if event.category == INTEREST_CATEGORY {
        if let Some(label) = event.label.as_deref().filter(|l| !l.is_empty()) {
            add_interest(visitor, label);
        }
    }
}

/// Add a tag unless an identical (case-sensitive) tag is already present.
pub fn add_interest(visitor: &mut Visitor, tag: &str) -> bool {
    if visitor.has_interest(tag) {
        return false;
    }
    visitor.behavior.interests.push(tag.to_string());
    true
}

/// Merge one captured field into its form. Returns the form's field count.
pub fn merge_form_field(visitor: &mut Visitor, capture: &FieldCapture, now: DateTime<Utc>) -> usize {
    let index = match visitor
        .form_interactions
        .iter()
        .position(|f| f.form_id == capture.form_id)
    {
        Some(index) => index,
        None => {
            visitor.form_interactions.push(FormInteraction {
                form_id: capture.form_id.clone(),
                fields: Vec::new(),
                started_at: now,
            });
            visitor.form_interactions.len() - 1
        }
    };
    let form = &mut visitor.form_interactions[index];

    match form.fields.iter_mut().find(|f| f.name == capture.field_name) {
        Some(field) => {
            field.last_value = capture.field_value.clone();
            field.last_updated = now;
            field.interacted = true;
        }
        None => form.fields.push(FormField {
            name: capture.field_name.clone(),
            interacted: true,
            completed: !capture.field_value.is_empty(),
            last_value: capture.field_value.clone(),
            last_updated: now,
        }),
    }
    form.fields.len()
}

/// Fields named `email`, `phone` or `name` populate the visitor's identity
/// directly. Returns true when email or phone was written.
fn capture_identity_field(visitor: &mut Visitor, capture: &FieldCapture) -> bool {
    if capture.field_value.is_empty() {
        return false;
    }
    let value = Some(capture.field_value.clone());
    match capture.field_name.as_str() {
        "email" => {
            visitor.email = value;
            true
        }
        "phone" => {
            visitor.phone = value;
            true
        }
        "name" => {
            visitor.name = value;
            false
        }
        _ => false,
    }
}

/// Copy supplied identity fields. Returns true when email or phone was written.
pub fn apply_identify(visitor: &mut Visitor, identify: &Identify) -> bool {
    let mut contact = false;
    if set_if_present(&mut visitor.email, &identify.email) {
        contact = true;
    }
    if set_if_present(&mut visitor.phone, &identify.phone) {
        contact = true;
    }
    set_if_present(&mut visitor.name, &identify.name);
    set_if_present(&mut visitor.first_name, &identify.first_name);
    set_if_present(&mut visitor.last_name, &identify.last_name);
    contact
}

fn set_if_present(target: &mut Option<String>, value: &Option<String>) -> bool {
    match value.as_deref().filter(|v| !v.is_empty()) {
        Some(v) => {
            *target = Some(v.to_string());
            true
        }
        None => false,
    }
}

/// Account for time spent on a page, and on the session it belongs to.
pub fn record_page_exit(visitor: &mut Visitor, exit: &PageExit, now: DateTime<Utc>) {
    let spent = exit.time_spent_secs;
    visitor.behavior.total_time_spent += spent;

    if let Some(page) = visitor.pages_visited.iter_mut().find(|p| p.url == exit.url) {
        page.total_time_spent += spent;
        page.average_time_spent = page.total_time_spent / f64::from(page.visits.max(1));
    }

    if let Some(session_id) = &exit.session_id {
        if let Some(session) = visitor
            .sessions
            .iter_mut()
            .find(|s| &s.session_id == session_id)
        {
            session.duration += spent;
            session.end_time = Some(now);
            session.bounced = session.page_views <= 1 && session.duration < BOUNCE_THRESHOLD_SECS;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lead_core::events::{PageRef, VisitorIdentity};

    fn visitor() -> Visitor {
        Visitor::new("v1".into(), "fp-1".into(), Utc::now())
    }

    fn page_view(url: &str, session: Option<&str>) -> TrackingEvent {
        TrackingEvent::PageView(PageView {
            identity: VisitorIdentity::new("v1"),
            session_id: session.map(str::to_string),
            referrer: Some("https://google.com".into()),
            page: PageRef {
                url: url.to_string(),
                title: Some("Title".into()),
            },
            device: None,
            location: None,
            ip_address: None,
        })
    }

    fn custom(category: &str, action: &str, label: Option<&str>) -> TrackingEvent {
        TrackingEvent::Custom(CustomEvent {
            identity: VisitorIdentity::new("v1"),
            category: category.into(),
            action: action.into(),
            label: label.map(str::to_string),
            value: None,
        })
    }

    fn field(form: &str, name: &str, value: &str) -> TrackingEvent {
        TrackingEvent::FieldCapture(FieldCapture {
            identity: VisitorIdentity::new("v1"),
            form_id: form.into(),
            field_name: name.into(),
            field_value: value.into(),
        })
    }

    #[test]
    fn test_new_session_is_appended_once() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &page_view("/", Some("s1")), now);
        apply(&mut v, &page_view("/pricing", Some("s1")), now);

        assert_eq!(v.sessions.len(), 1);
        let session = &v.sessions[0];
        assert_eq!(session.page_views, 1);
        assert_eq!(session.events, 0);
        assert!(!session.bounced);
        assert_eq!(session.referrer.as_deref(), Some("https://google.com"));

        apply(&mut v, &page_view("/", Some("s2")), now);
        assert_eq!(v.sessions.len(), 2);
    }

    #[test]
    fn test_page_merge_counts_visits_by_url() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &page_view("/", None), now);
        apply(&mut v, &page_view("/", None), now);
        apply(&mut v, &page_view("/about", None), now);

        assert_eq!(v.pages_visited.len(), 2);
        assert_eq!(v.pages_visited[0].visits, 2);
        assert_eq!(v.pages_visited[1].visits, 1);
        assert_eq!(v.behavior.total_page_views, 3);
        assert!(v.sessions.is_empty());
    }

    #[test]
    fn test_form_start_adds_interest_once() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &custom("form", "start", None), now);
        apply(&mut v, &custom("form", "start", None), now);

        assert_eq!(v.events.len(), 2);
        assert_eq!(v.behavior.interests, vec![FORM_INTERACTION_TAG.to_string()]);
    }

    #[test]
    fn test_interest_events_tag_visitor() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &custom("interest", "view", Some("seo")), now);
        apply(&mut v, &custom("interest", "view", Some("SEO")), now);
        apply(&mut v, &custom("interest", "view", Some("")), now);
        apply(&mut v, &custom("video", "play", Some("marketing")), now);

        assert_eq!(v.behavior.interests, vec!["seo".to_string(), "SEO".to_string()]);
    }

    #[test]
    fn test_form_field_merge() {
        let mut v = visitor();
        let now = Utc::now();
        let outcome = apply(&mut v, &field("contact", "company", ""), now);
        assert_eq!(outcome.form_field_count, Some(1));
        assert!(!v.form_interactions[0].fields[0].completed);

        let outcome = apply(&mut v, &field("contact", "company", "Acme"), now);
        assert_eq!(outcome.form_field_count, Some(1));
        let f = &v.form_interactions[0].fields[0];
        assert_eq!(f.last_value, "Acme");
        assert!(f.interacted);

        apply(&mut v, &field("newsletter", "topic", "seo"), now);
        assert_eq!(v.form_interactions.len(), 2);
        assert!(v.form("newsletter").unwrap().fields[0].completed);
    }

    #[test]
    fn test_field_capture_identifies_visitor() {
        let mut v = visitor();
        let now = Utc::now();
        let outcome = apply(&mut v, &field("contact", "name", "Ada"), now);
        assert!(!outcome.contact_captured);
        assert_eq!(v.name.as_deref(), Some("Ada"));

        let outcome = apply(&mut v, &field("contact", "email", "ada@example.com"), now);
        assert!(outcome.contact_captured);
        assert_eq!(v.email.as_deref(), Some("ada@example.com"));

        let outcome = apply(&mut v, &field("contact", "phone", ""), now);
        assert!(!outcome.contact_captured);
        assert!(v.phone.is_none());
    }

    #[test]
    fn test_identify_copies_present_fields() {
        let mut v = visitor();
        v.name = Some("Old".into());
        let identify = TrackingEvent::Identify(Identify {
            identity: VisitorIdentity::new("v1"),
            email: None,
            phone: Some("+1-555-0100".into()),
            name: Some(String::new()),
            first_name: Some("Ada".into()),
            last_name: None,
        });
        let outcome = apply(&mut v, &identify, Utc::now());
        assert!(outcome.contact_captured);
        assert_eq!(v.phone.as_deref(), Some("+1-555-0100"));
        assert_eq!(v.name.as_deref(), Some("Old"));
        assert_eq!(v.first_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_page_exit_accumulates_time() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &page_view("/", Some("s1")), now);
        apply(&mut v, &page_view("/", Some("s1")), now);

        let exit = TrackingEvent::PageExit(PageExit {
            identity: VisitorIdentity::new("v1"),
            session_id: Some("s1".into()),
            url: "/".into(),
            time_spent_secs: 40.0,
        });
        apply(&mut v, &exit, now);

        assert_eq!(v.behavior.total_time_spent, 40.0);
        assert_eq!(v.pages_visited[0].total_time_spent, 40.0);
        assert_eq!(v.pages_visited[0].average_time_spent, 20.0);
        assert_eq!(v.sessions[0].duration, 40.0);
        assert_eq!(v.sessions[0].end_time, Some(now));
        assert!(!v.sessions[0].bounced);
    }

    #[test]
    fn test_short_single_page_session_bounces() {
        let mut v = visitor();
        let now = Utc::now();
        apply(&mut v, &page_view("/", Some("s1")), now);
        let exit = TrackingEvent::PageExit(PageExit {
            identity: VisitorIdentity::new("v1"),
            session_id: Some("s1".into()),
            url: "/".into(),
            time_spent_secs: 3.0,
        });
        apply(&mut v, &exit, now);
        assert!(v.sessions[0].bounced);
    }

    #[test]
    fn test_page_exit_for_unknown_page_only_counts_total() {
        let mut v = visitor();
        let exit = TrackingEvent::PageExit(PageExit {
            identity: VisitorIdentity::new("v1"),
            session_id: Some("missing".into()),
            url: "/never-seen".into(),
            time_spent_secs: 12.5,
        });
        apply(&mut v, &exit, Utc::now());
        assert_eq!(v.behavior.total_time_spent, 12.5);
        assert!(v.pages_visited.is_empty());
    }
}

//! Engagement and lead scoring.
//!
//! Both scores are pure functions of the visitor record (plus the current
//! time for recency). They are always recomputed from scratch so the result
//! does not depend on the order in which events arrived.

use chrono::{DateTime, Utc};
use lead_core::types::{SessionRecord, Visitor};

pub const MAX_SCORE: u32 = 100;

const SECS_PER_DAY: f64 = 86_400.0;

/// Mean session duration in seconds, 0 when there are no sessions.
pub fn average_session_duration(sessions: &[SessionRecord]) -> f64 {
    if sessions.is_empty() {
        return 0.0;
    }
    let total: f64 = sessions.iter().map(|s| s.duration).sum();
    total / sessions.len() as f64
}

/// Recency, frequency, session length, depth and breadth, capped at 100.
pub fn engagement_score(visitor: &Visitor, now: DateTime<Utc>) -> u8 {
    let mut score: u32 = 0;

    let days_since_last_visit =
        (now - visitor.last_visit).num_milliseconds() as f64 / (SECS_PER_DAY * 1000.0);
    score += if days_since_last_visit < 1.0 {
        30
    } else if days_since_last_visit < 7.0 {
        20
    } else if days_since_last_visit < 30.0 {
        10
    } else {
        0
    };

    score += if visitor.total_visits > 5 {
        20
    } else if visitor.total_visits > 2 {
        10
    } else {
        0
    };

    let avg_duration = average_session_duration(&visitor.sessions);
    score += if avg_duration > 180.0 {
        20
    } else if avg_duration > 60.0 {
        10
    } else {
        0
    };

    if visitor.total_visits > 0 {
        let pages_per_visit =
            visitor.behavior.total_page_views as f64 / f64::from(visitor.total_visits);
        if pages_per_visit > 3.0 {
            score += 15;
        }
    }

    if visitor.behavior.interests.len() > 2 {
        score += 15;
    }

    cap(score)
}

/// Sales-readiness estimate. Reads the stored engagement score as an input,
/// so call it after the engagement score has been refreshed.
pub fn lead_score(visitor: &Visitor) -> u8 {
    let behavior = &visitor.behavior;
    let mut score: u32 = 0;

    if behavior.engagement_score > 50 {
        score += 20;
    }
    if behavior.total_page_views > 5 {
        score += 15;
    }
    if behavior.total_time_spent > 300.0 {
        score += 15;
    }

    if visitor.has_interest("marketing") {
        score += 20;
    }
    if visitor.has_interest("seo") {
        score += 15;
    }
    if visitor.has_interest("advertising") {
        score += 15;
    }

    if visitor.email.as_deref().is_some_and(|e| !e.is_empty()) {
        score += 15;
    }
    if visitor.phone.as_deref().is_some_and(|p| !p.is_empty()) {
        score += 5;
    }

    if !visitor.form_interactions.is_empty() {
        score += 10;
    }

    cap(score)
}

/// Refresh every derived behavior field in dependency order.
pub fn rescore(visitor: &mut Visitor, now: DateTime<Utc>) {
    visitor.behavior.average_session_duration = average_session_duration(&visitor.sessions);
    visitor.behavior.engagement_score = engagement_score(visitor, now);
    visitor.behavior.lead_score = lead_score(visitor);
}

fn cap(score: u32) -> u8 {
    score.min(MAX_SCORE) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lead_core::types::FormInteraction;

    fn session(id: &str, duration: f64) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration,
            page_views: 1,
            events: 0,
            referrer: None,
            bounced: false,
        }
    }

    fn blank(now: DateTime<Utc>) -> Visitor {
        Visitor::new("v1".into(), "fp".into(), now)
    }

    fn engaged_visitor(last_visit: DateTime<Utc>) -> Visitor {
        let mut v = blank(last_visit);
        v.total_visits = 6;
        v.sessions = vec![session("s1", 150.0), session("s2", 250.0)];
        v.behavior.total_page_views = 20;
        v.behavior.interests = vec!["marketing".into(), "seo".into(), "ads".into()];
        v
    }

    #[test]
    fn test_new_visitor_scores_recency_only() {
        let now = Utc::now();
        let v = blank(now);
        assert_eq!(engagement_score(&v, now), 30);
        assert_eq!(lead_score(&v), 0);
    }

    #[test]
    fn test_engagement_components_without_recency() {
        let now = Utc::now();
        let v = engaged_visitor(now - Duration::days(45));
        assert_eq!(average_session_duration(&v.sessions), 200.0);
        // 20 frequency + 20 duration + 15 depth (20/6 > 3) + 15 breadth
        assert_eq!(engagement_score(&v, now), 70);
    }

    #[test]
    fn test_engagement_caps_at_100() {
        let now = Utc::now();
        let v = engaged_visitor(now);
        assert_eq!(engagement_score(&v, now), 100);
    }

    #[test]
    fn test_recency_buckets() {
        let now = Utc::now();
        let cases = [
            (Duration::hours(3), 30),
            (Duration::days(3), 20),
            (Duration::days(10), 10),
            (Duration::days(30), 0),
        ];
        for (age, expected) in cases {
            let v = blank(now - age);
            assert_eq!(engagement_score(&v, now), expected, "age {age:?}");
        }
    }

    #[test]
    fn test_frequency_and_duration_middle_buckets() {
        let now = Utc::now();
        let mut v = blank(now - Duration::days(60));
        v.total_visits = 3;
        v.sessions = vec![session("s1", 90.0)];
        assert_eq!(engagement_score(&v, now), 20);
    }

    #[test]
    fn test_depth_skipped_without_visits() {
        let now = Utc::now();
        let mut v = blank(now - Duration::days(60));
        v.total_visits = 0;
        v.behavior.total_page_views = 50;
        assert_eq!(engagement_score(&v, now), 0);
    }

    #[test]
    fn test_lead_score_full_profile() {
        let now = Utc::now();
        let mut v = blank(now);
        v.email = Some("ada@example.com".into());
        v.behavior.engagement_score = 60;
        v.behavior.total_page_views = 6;
        v.behavior.total_time_spent = 301.0;
        v.behavior.interests = vec!["marketing".into()];
        v.form_interactions.push(FormInteraction {
            form_id: "contact".into(),
            fields: Vec::new(),
            started_at: now,
        });
        assert_eq!(lead_score(&v), 95);
    }

    #[test]
    fn test_lead_score_caps_at_100() {
        let now = Utc::now();
        let mut v = blank(now);
        v.email = Some("ada@example.com".into());
        v.phone = Some("+1-555-0100".into());
        v.behavior.engagement_score = 80;
        v.behavior.total_page_views = 30;
        v.behavior.total_time_spent = 900.0;
        v.behavior.interests = vec!["marketing".into(), "seo".into(), "advertising".into()];
        assert_eq!(lead_score(&v), 100);
    }

    #[test]
    fn test_rescore_is_idempotent() {
        let now = Utc::now();
        let mut v = engaged_visitor(now - Duration::days(2));
        v.email = Some("ada@example.com".into());

        rescore(&mut v, now);
        let first = v.behavior.clone();
        rescore(&mut v, now);

        assert_eq!(v.behavior.engagement_score, first.engagement_score);
        assert_eq!(v.behavior.lead_score, first.lead_score);
        assert_eq!(v.behavior.average_session_duration, 200.0);
        // 20 recency + 70
        assert_eq!(v.behavior.engagement_score, 90);
        // 20 engagement + 15 pages + 20 marketing + 15 seo + 15 email
        assert_eq!(v.behavior.lead_score, 85);
    }
}

//! Tracing layer that forwards ERROR events to an alert webhook.
//!
//! At most one alert per [`MIN_INTERVAL`]; an identical message is not
//! repeated within [`DEDUP_WINDOW`]. Delivery is spawned onto the runtime
//! and its failures are ignored.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

// ── Throttle ──

struct Throttle {
    last_sent: Option<Instant>,
    /// (message hash, sent at)
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Whether a message with `hash` may go out at `now`; records it if so.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, at)| now.saturating_duration_since(*at) < DEDUP_WINDOW);
        let duplicate = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < MIN_INTERVAL);
        if duplicate || too_soon {
            return false;
        }
        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

fn hash_of(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

// ── Layer ──

pub struct AlertLayer {
    webhook_url: String,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl AlertLayer {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

fn render(message: &str, target: &str, file: &str, line: Option<u32>) -> String {
    let line = line.map(|l| l.to_string()).unwrap_or_else(|| "?".into());
    let at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    format!("[salon-booking] ERROR {message}\n{target} ({file}:{line})\n{at}")
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let admitted = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(hash_of(&message), Instant::now());
        if !admitted {
            return;
        }

        // Events emitted outside a runtime (startup, tests) are not forwarded.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let text = render(&message, meta.target(), meta.file().unwrap_or("?"), meta.line());
        let request = self
            .http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }));
        runtime.spawn(async move {
            let _ = request.send().await;
        });
    }
}

// ── Field visitor ──

/// Collects the `message` field and any structured fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        let extras = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        match (self.message.is_empty(), extras.is_empty()) {
            (_, true) => self.message.clone(),
            (true, false) => extras,
            (false, false) => format!("{} ({})", self.message, extras),
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_goes_out() {
        let mut t = Throttle::new();
        assert!(t.admit(1, Instant::now()));
    }

    #[test]
    fn test_second_alert_within_interval_is_dropped() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(!t.admit(2, now + Duration::from_secs(3)));
        assert!(t.admit(2, now + MIN_INTERVAL));
    }

    #[test]
    fn test_duplicate_suppressed_until_window_passes() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(7, now));
        assert!(!t.admit(7, now + Duration::from_secs(30)));
        assert!(t.admit(7, now + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn test_message_with_fields() {
        let v = MessageVisitor {
            message: "slot fetch failed".into(),
            fields: vec![("date".into(), "2026-03-02".into())],
        };
        assert_eq!(v.message(), "slot fetch failed (date=2026-03-02)");
        let only = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(only.message(), "error=timeout");
    }

    #[test]
    fn test_render_mentions_location() {
        let text = render("boom", "salon_booking_server::backend", "src/backend/rest.rs", Some(42));
        assert!(text.contains("ERROR boom"));
        assert!(text.contains("src/backend/rest.rs:42"));
    }
}

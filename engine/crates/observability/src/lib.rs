pub mod capture;
pub mod log_ring;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub use capture::{CaptureGuard, CaptureLayer, LogCapture};
pub use log_ring::{LogEntry, LogRing, LogRingError, RingLayer, DEFAULT_LOG_CAPACITY};

/// Install the global subscriber: env filter, stdout formatter, the `/logs`
/// ring and the command-output capture.
pub fn init_logging(ring: &LogRing, capture: &LogCapture) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(ring.layer())
        .with(capture.layer())
        .init();
}

#[derive(Debug, Clone)]
pub struct TickMetrics {
    pub tick_number: u64,
    pub duration_us: u128,
    /// Tasks executed during this tick.
    pub tasks_run: usize,
    /// Live tasks still queued after this tick.
    pub tasks_pending: usize,
    pub budget_us: u128,
}

impl TickMetrics {
    pub fn log(&self) {
        if self.duration_us > self.budget_us {
            tracing::warn!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                tasks_run = self.tasks_run,
                tasks_pending = self.tasks_pending,
                "tick exceeded budget ({}us > {}us)",
                self.duration_us,
                self.budget_us
            );
        } else {
            tracing::trace!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                tasks_run = self.tasks_run,
                tasks_pending = self.tasks_pending,
                "tick completed"
            );
        }
    }
}

/// Collects the `message` field of an event plus any other fields as
/// `key=value` pairs.
pub(crate) struct EventText {
    pub message: String,
    pub fields: String,
}

impl EventText {
    pub fn from_event(event: &tracing::Event<'_>) -> Self {
        let mut text = Self {
            message: String::new(),
            fields: String::new(),
        };
        event.record(&mut text);
        text
    }

    pub fn into_line(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl tracing::field::Visit for EventText {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), &format!("{:?}", value));
        }
    }
}

impl EventText {
    fn push_field(&mut self, name: &str, value: &str) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        self.fields.push_str(name);
        self.fields.push('=');
        self.fields.push_str(value);
    }
}

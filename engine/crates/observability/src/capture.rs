use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::EventText;

#[derive(Default)]
struct CaptureState {
    next_id: u64,
    active: Vec<(u64, String)>,
}

/// Temporarily collects log lines emitted while a remote command runs.
///
/// Every live [`CaptureGuard`] receives a copy of each INFO-and-above event
/// recorded through [`CaptureLayer`]. Dropping the guard detaches it, so an
/// early return or panic never leaves a capture attached.
#[derive(Clone, Default)]
pub struct LogCapture {
    inner: Arc<Mutex<CaptureState>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> CaptureGuard {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.active.push((id, String::new()));
        CaptureGuard {
            capture: self.clone(),
            id,
            detached: false,
        }
    }

    /// Append a line to every active capture.
    pub fn record(&self, line: &str) {
        let mut state = self.lock();
        for (_, buf) in state.active.iter_mut() {
            buf.push_str(line);
            buf.push('\n');
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer {
            capture: self.clone(),
        }
    }

    fn take(&self, id: u64) -> String {
        let mut state = self.lock();
        match state.active.iter().position(|(i, _)| *i == id) {
            Some(idx) => state.active.swap_remove(idx).1,
            None => String::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct CaptureGuard {
    capture: LogCapture,
    id: u64,
    detached: bool,
}

impl CaptureGuard {
    /// What has been captured so far, without detaching.
    pub fn output(&self) -> String {
        let state = self.capture.lock();
        state
            .active
            .iter()
            .find(|(i, _)| *i == self.id)
            .map(|(_, buf)| buf.clone())
            .unwrap_or_default()
    }

    /// Detach and return everything captured.
    pub fn finish(mut self) -> String {
        self.detached = true;
        self.capture.take(self.id)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.detached {
            self.capture.take(self.id);
        }
    }
}

pub struct CaptureLayer {
    capture: LogCapture,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::INFO {
            return;
        }
        if self.capture.active_count() == 0 {
            return;
        }
        let line = EventText::from_event(event).into_line();
        self.capture.record(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn guard_collects_lines_until_finished() {
        let capture = LogCapture::new();
        let guard = capture.begin();
        capture.record("one");
        capture.record("two");
        assert_eq!(guard.output(), "one\ntwo\n");
        assert_eq!(guard.finish(), "one\ntwo\n");
        assert_eq!(capture.active_count(), 0);

        capture.record("three");
        assert_eq!(capture.active_count(), 0);
    }

    #[test]
    fn drop_detaches() {
        let capture = LogCapture::new();
        {
            let _guard = capture.begin();
            assert_eq!(capture.active_count(), 1);
        }
        assert_eq!(capture.active_count(), 0);
    }

    #[test]
    fn overlapping_guards_see_their_own_window() {
        let capture = LogCapture::new();
        let first = capture.begin();
        capture.record("a");
        let second = capture.begin();
        capture.record("b");
        assert_eq!(first.finish(), "a\nb\n");
        capture.record("c");
        assert_eq!(second.finish(), "b\nc\n");
    }

    #[test]
    fn layer_feeds_active_guard() {
        let capture = LogCapture::new();
        let subscriber = tracing_subscriber::registry().with(capture.layer());
        let out = tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before");
            let guard = capture.begin();
            tracing::info!(name = "alice", "kicked");
            tracing::debug!("hidden");
            guard.finish()
        });
        assert_eq!(out, "kicked name=alice\n");
    }
}

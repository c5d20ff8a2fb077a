use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::EventText;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// One captured log line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    /// ISO-8601, UTC.
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogRingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

struct RingState {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    mirror: Option<File>,
}

impl RingState {
    fn insert(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Bounded ring of recent log lines, optionally mirrored to a JSON-Lines
/// file. Safe to push from any thread; the oldest entry is dropped on
/// overflow.
#[derive(Clone)]
pub struct LogRing {
    inner: Arc<Mutex<RingState>>,
}

impl LogRing {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RingState {
                entries: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                mirror: None,
            })),
        }
    }

    /// Open (or create) the mirror file, seeding the ring with the newest
    /// `capacity` entries already in it. Unparsable lines are skipped.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, LogRingError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let ring = Self::in_memory(capacity);
        {
            let mut state = ring.lock();
            match File::open(path) {
                Ok(file) => {
                    for line in BufReader::new(file).lines() {
                        let line = line?;
                        if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                            state.insert(entry);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            state.mirror = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        Ok(ring)
    }

    /// Append a line, stamping it with the current time.
    pub fn push(&self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::new(message);
        let mut state = self.lock();
        if let Some(file) = state.mirror.as_mut() {
            // Write failures are dropped: reporting them through tracing
            // would re-enter this layer.
            if let Ok(mut line) = serde_json::to_string(&entry) {
                line.push('\n');
                let _ = file.write_all(line.as_bytes());
            }
        }
        state.insert(entry.clone());
        entry
    }

    /// Snapshot of the ring, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn layer(&self) -> RingLayer {
        RingLayer { ring: self.clone() }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Feeds INFO-and-above events into a [`LogRing`].
pub struct RingLayer {
    ring: LogRing,
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::INFO {
            return;
        }
        let line = EventText::from_event(event).into_line();
        self.ring.push(line);
    }
}

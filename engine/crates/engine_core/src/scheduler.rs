use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

/// One-shot job executed on the logic thread.
pub type Job<C> = Box<dyn FnOnce(&mut C) + Send>;
/// Repeating job. Returning [`Repeat::Stop`] ends the schedule.
pub type RepeatingJob<C> = Box<dyn FnMut(&mut C) -> Repeat + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Cancellable reference to a scheduled task.
///
/// Cancelling is idempotent and a no-op once the task has fired.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Also true once a one-shot task has fired or a repeating task stopped.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("logic thread is no longer accepting tasks")]
    Closed,

    #[error("task was dropped before producing a result")]
    Dropped,
}

enum TaskKind<C> {
    Once(Job<C>),
    Repeating { job: RepeatingJob<C>, period: u64 },
}

struct Entry<C> {
    handle: TaskHandle,
    due: u64,
    kind: TaskKind<C>,
}

/// Submission side of the logic-thread task queue.
///
/// Cheap to clone and `Send`, so worker tasks can hand continuations back
/// to the logic thread. Delays are measured in ticks relative to the tick
/// the logic thread is currently processing.
pub struct Scheduler<C> {
    tx: mpsc::UnboundedSender<Entry<C>>,
    clock: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            clock: Arc::clone(&self.clock),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<C: 'static> Scheduler<C> {
    /// Run `job` on the next tick.
    pub fn run_now(&self, job: impl FnOnce(&mut C) + Send + 'static) -> TaskHandle {
        self.run_after(0, job)
    }

    /// Run `job` once, `delay` ticks from now.
    pub fn run_after(&self, delay: u64, job: impl FnOnce(&mut C) + Send + 'static) -> TaskHandle {
        self.submit(delay, TaskKind::Once(Box::new(job)))
    }

    /// Run `job` after `initial_delay` ticks, then every `period` ticks until it
    /// returns [`Repeat::Stop`] or the handle is cancelled.
    pub fn run_repeating(
        &self,
        initial_delay: u64,
        period: u64,
        job: impl FnMut(&mut C) -> Repeat + Send + 'static,
    ) -> TaskHandle {
        self.submit(
            initial_delay,
            TaskKind::Repeating {
                job: Box::new(job),
                period: period.max(1),
            },
        )
    }

    /// Submit `f` and wait for the single value it produces.
    pub async fn call<R, F>(&self, f: F) -> Result<R, SchedulerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        self.call_with(move |ctx, reply| {
            let _ = reply.send(f(ctx));
        })
        .await
    }

    /// Like [`Scheduler::call`], but the job owns the reply slot and may fill
    /// it from a later task (e.g. after a few ticks of grace).
    pub async fn call_with<R, F>(&self, f: F) -> Result<R, SchedulerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut C, oneshot::Sender<R>) + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = self.run_now(move |ctx| f(ctx, reply_tx));
        if handle.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        reply_rx.await.map_err(|_| SchedulerError::Dropped)
    }

    /// Tick the logic thread is currently processing.
    pub fn current_tick(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit(&self, delay: u64, kind: TaskKind<C>) -> TaskHandle {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = TaskHandle::new(id);
        let entry = Entry {
            handle: handle.clone(),
            due: self.current_tick().saturating_add(delay),
            kind,
        };
        if self.tx.send(entry).is_err() {
            tracing::debug!(task = %id, "logic thread gone, task discarded");
            handle.cancel();
        }
        handle
    }
}

/// Logic-thread side of the task queue. Owned by the tick loop.
pub struct TaskQueue<C> {
    rx: mpsc::UnboundedReceiver<Entry<C>>,
    clock: Arc<AtomicU64>,
    pending: BTreeMap<(u64, TaskId), Entry<C>>,
}

/// Create a connected scheduler / queue pair.
pub fn task_queue<C: 'static>() -> (Scheduler<C>, TaskQueue<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let clock = Arc::new(AtomicU64::new(0));
    let scheduler = Scheduler {
        tx,
        clock: Arc::clone(&clock),
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let queue = TaskQueue {
        rx,
        clock,
        pending: BTreeMap::new(),
    };
    (scheduler, queue)
}

impl<C: 'static> TaskQueue<C> {
    /// Run every task due at or before `tick`. Tasks submitted while this runs
    /// are picked up on the next call. Returns the number of jobs executed.
    pub fn run_tick(&mut self, tick: u64, ctx: &mut C) -> usize {
        self.clock.store(tick, Ordering::Release);

        while let Ok(entry) = self.rx.try_recv() {
            if !entry.handle.is_cancelled() {
                self.pending.insert((entry.due, entry.handle.id), entry);
            }
        }

        let mut executed = 0;
        while let Some(mut entry) = self.pop_due(tick) {
            if entry.handle.is_cancelled() {
                continue;
            }
            executed += 1;
            let id = entry.handle.id;
            match entry.kind {
                TaskKind::Once(job) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(ctx))) {
                        tracing::error!(task = %id, "task panicked: {}", panic_message(&*payload));
                    }
                    entry.handle.cancel();
                }
                TaskKind::Repeating { mut job, period } => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| job(ctx)));
                    match outcome {
                        Ok(Repeat::Continue) if !entry.handle.is_cancelled() => {
                            entry.due = tick + period;
                            entry.kind = TaskKind::Repeating { job, period };
                            self.pending.insert((entry.due, id), entry);
                        }
                        Ok(_) => entry.handle.cancel(),
                        Err(payload) => {
                            tracing::error!(
                                task = %id,
                                "repeating task panicked, unscheduled: {}",
                                panic_message(&*payload)
                            );
                            entry.handle.cancel();
                        }
                    }
                }
            }
        }

        executed
    }

    /// Number of live (not cancelled) tasks known to the queue.
    pub fn pending_count(&self) -> usize {
        self.pending
            .values()
            .filter(|e| !e.handle.is_cancelled())
            .count()
    }

    /// Drop every queued task. Used on teardown so reply slots held by
    /// pending jobs are released.
    pub fn clear(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.pending.clear();
    }

    fn pop_due(&mut self, tick: u64) -> Option<Entry<C>> {
        let (&key, _) = self.pending.first_key_value()?;
        if key.0 > tick {
            return None;
        }
        self.pending.remove(&key)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

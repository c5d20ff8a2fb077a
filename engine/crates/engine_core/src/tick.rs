use std::time::{Duration, Instant};

use crate::scheduler::TaskQueue;

/// Ticks per second the control-plane timings are expressed in.
pub const TICKS_PER_SECOND: u64 = 20;

/// Tick loop configuration.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Ticks per second.
    pub tps: u32,
    /// Maximum ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tps: TICKS_PER_SECOND as u32,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tps.max(1) as f64)
    }
}

/// The logic-thread loop: owns the context `C` and drains its task queue
/// once per tick.
pub struct TickLoop<C> {
    pub ctx: C,
    pub tasks: TaskQueue<C>,
    pub config: TickConfig,
    pub current_tick: u64,
}

impl<C: 'static> TickLoop<C> {
    pub fn new(config: TickConfig, ctx: C, tasks: TaskQueue<C>) -> Self {
        Self {
            ctx,
            tasks,
            config,
            current_tick: 0,
        }
    }

    /// Execute a single tick: run due tasks → metrics.
    pub fn step(&mut self) -> observability::TickMetrics {
        let start = Instant::now();

        let tasks_run = self.tasks.run_tick(self.current_tick, &mut self.ctx);

        self.current_tick += 1;
        let duration = start.elapsed();

        observability::TickMetrics {
            tick_number: self.current_tick,
            duration_us: duration.as_micros(),
            tasks_run,
            tasks_pending: self.tasks.pending_count(),
            budget_us: self.config.tick_duration().as_micros(),
        }
    }

    /// Run until `max_ticks` (or forever when 0), or until `keep_running`
    /// returns false. `keep_running` is checked before every tick with the
    /// context, so callers can feed external events into it.
    pub fn run_while(&mut self, mut keep_running: impl FnMut(&mut C) -> bool) -> u64 {
        let tick_duration = self.config.tick_duration();

        loop {
            if self.config.max_ticks > 0 && self.current_tick >= self.config.max_ticks {
                break;
            }
            if !keep_running(&mut self.ctx) {
                break;
            }

            let tick_start = Instant::now();
            let metrics = self.step();
            metrics.log();

            // Sleep until next tick
            let elapsed = tick_start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            }
        }

        self.current_tick
    }

    /// Run the loop for the configured number of ticks.
    pub fn run(&mut self) -> u64 {
        self.run_while(|_| true)
    }
}

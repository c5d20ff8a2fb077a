pub mod scheduler;
pub mod tick;

pub use scheduler::{task_queue, Repeat, Scheduler, SchedulerError, TaskHandle, TaskId, TaskQueue};
pub use tick::{TickConfig, TickLoop, TICKS_PER_SECOND};

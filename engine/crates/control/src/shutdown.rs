use authority::{AuthorityError, CancelShutdownRequest};
use engine_core::{Repeat, TaskHandle, TICKS_PER_SECOND};
use session::ParticipantId;
use tokio::sync::oneshot;

use crate::host::{Host, Notice};
use crate::plane::ControlPlane;

const TPS: i64 = TICKS_PER_SECOND as i64;

/// Delays above this get a public "shutting down in N seconds" notice.
pub const PUBLIC_WARNING_TICKS: i64 = 15 * TPS;
/// Delays above this get a per-second countdown before the end.
pub const COUNTDOWN_TICKS: i64 = 10 * TPS;
pub const COUNTDOWN_PERIOD_TICKS: u64 = TICKS_PER_SECOND;
pub const COUNTDOWN_SECONDS: u32 = 10;

const SHUTTING_DOWN: &str = "Shutting down server!";
const CANCELLED: &str = "Cancelled shutdown";
const CANCEL_DENIED: &str = "Shutdown cancellation denied by API";
const CANCEL_ERROR: &str = "Error contacting API for shutdown cancellation";

/// Zero-or-one pending shutdown.
#[derive(Debug, Default)]
pub struct ShutdownScheduler {
    countdown: Option<TaskHandle>,
    final_task: Option<TaskHandle>,
    grace: bool,
    /// Bumped by every accepted schedule.
    generation: u64,
}

impl ShutdownScheduler {
    pub fn is_pending(&self) -> bool {
        self.final_task.is_some()
    }

    /// Pending and cancellable by a returning participant.
    pub fn is_grace_period(&self) -> bool {
        self.grace && self.is_pending()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_pending() && self.generation == generation
    }

    fn clear(&mut self) {
        for handle in [self.countdown.take(), self.final_task.take()]
            .into_iter()
            .flatten()
        {
            handle.cancel();
        }
        self.grace = false;
    }
}

impl<H: Host> ControlPlane<H> {
    /// Schedule the terminal shutdown `delay` ticks from now. A delay of zero
    /// or less shuts down immediately. Fails if one is already pending.
    pub fn schedule_shutdown(&mut self, delay: i64, allow_grace: bool) -> bool {
        tracing::info!(delay_ticks = delay, grace = allow_grace, "shutdown requested");

        if delay <= 0 {
            self.host.broadcast(Notice::critical(SHUTTING_DOWN));
            self.shutdown.clear();
            self.terminate();
            return true;
        }
        if self.shutdown.is_pending() {
            tracing::debug!("shutdown already pending");
            return false;
        }

        self.shutdown.grace = allow_grace;
        self.shutdown.generation += 1;
        let seconds = delay / TPS;
        if allow_grace {
            self.host.broadcast(Notice::warning(format!(
                "All players left. Server will shutdown in {} seconds if no one rejoins.",
                seconds
            )));
        } else if delay > PUBLIC_WARNING_TICKS {
            self.host.broadcast(Notice::critical(format!(
                "Shutting down server in {} seconds",
                seconds
            )));
        }

        if delay > COUNTDOWN_TICKS {
            let mut remaining = COUNTDOWN_SECONDS;
            let start = (delay - COUNTDOWN_TICKS) as u64;
            let handle = self
                .tasks
                .run_repeating(start, COUNTDOWN_PERIOD_TICKS, move |plane| {
                    plane.host.broadcast(Notice::critical(format!(
                        "Shutting down in {} seconds!",
                        remaining
                    )));
                    remaining -= 1;
                    if remaining == 0 {
                        Repeat::Stop
                    } else {
                        Repeat::Continue
                    }
                });
            self.shutdown.countdown = Some(handle);
        }

        let handle = self
            .tasks
            .run_after(delay as u64, |plane| plane.finish_shutdown());
        self.shutdown.final_task = Some(handle);
        true
    }

    fn finish_shutdown(&mut self) {
        self.host.broadcast(Notice::critical(SHUTTING_DOWN));
        tracing::info!("scheduled shutdown reached");
        self.shutdown.clear();
        self.terminate();
    }

    /// Cancel the pending shutdown. False when nothing is pending.
    pub fn cancel_shutdown(&mut self) -> bool {
        if !self.shutdown.is_pending() {
            return false;
        }
        tracing::info!("cancelling shutdown");
        self.shutdown.clear();
        self.host.broadcast(Notice::success(CANCELLED));
        true
    }

    pub fn has_scheduled_shutdown(&self) -> bool {
        self.shutdown.is_pending()
    }

    /// A participant (re)joined: abort a grace-period shutdown.
    pub fn handle_return_event(&mut self) {
        if self.shutdown.is_grace_period() {
            tracing::info!("participant returned during grace period");
            self.cancel_shutdown();
        }
    }

    /// Ask the authority whether `requester` may cancel the pending shutdown
    /// and cancel it if so. The receiver yields whether it was cancelled.
    pub fn cancel_shutdown_via_authority(&mut self, requester: ParticipantId) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.cancel_shutdown_via_authority_then(requester, move |_plane, cancelled| {
            let _ = tx.send(cancelled);
        });
        rx
    }

    /// Callback form of [`cancel_shutdown_via_authority`]; `then` runs on the
    /// logic thread.
    ///
    /// [`cancel_shutdown_via_authority`]: ControlPlane::cancel_shutdown_via_authority
    pub fn cancel_shutdown_via_authority_then(
        &mut self,
        requester: ParticipantId,
        then: impl FnOnce(&mut ControlPlane<H>, bool) + Send + 'static,
    ) {
        if !self.shutdown.is_pending() {
            tracing::info!("no shutdown scheduled to cancel");
            then(self, false);
            return;
        }
        let player_name = self
            .host
            .find_by_id(requester)
            .map(|p| p.name)
            .unwrap_or_default();
        let req = CancelShutdownRequest {
            server_port: self.host.server_port(),
            uuid: requester,
            player_name,
        };
        let generation = self.shutdown.generation;

        self.with_authority(
            move |auth| async move { auth.cancel_shutdown(req).await },
            move |plane, result| {
                let cancelled = match result {
                    Ok(true) if plane.shutdown.is_current(generation) => plane.cancel_shutdown(),
                    Ok(true) => {
                        tracing::info!(participant = %requester, "cancellation granted for a shutdown that is no longer pending");
                        false
                    }
                    Ok(false) | Err(AuthorityError::Status(_)) => {
                        tracing::info!(participant = %requester, "authority denied shutdown cancellation");
                        plane.host.broadcast(Notice::error(CANCEL_DENIED));
                        false
                    }
                    Err(e) => {
                        tracing::warn!("error calling cancel-shutdown endpoint: {}", e);
                        plane.host.broadcast(Notice::error(CANCEL_ERROR));
                        false
                    }
                };
                then(plane, cancelled);
            },
        );
    }
}

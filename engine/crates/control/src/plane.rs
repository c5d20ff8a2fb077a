use std::future::Future;
use std::sync::Arc;

use authority::Authority;
use engine_core::Scheduler;
use observability::LogCapture;
use serde::Serialize;
use session::{Participant, ParticipantId};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::gate::Capability;
use crate::host::{CommandSink, Host, HostEvent, Notice};
use crate::shutdown::ShutdownScheduler;
use crate::verification::VerificationManager;

/// Ticks a remote command keeps capturing log output after it returns.
pub const COMMAND_LOG_GRACE_TICKS: u64 = 2;

pub const CANCEL_STOP_PERMISSION: &str = "connector.cancelstop";

const NO_PERMISSION: &str = "You don't have permission to use this command";
const NO_SHUTDOWN_SCHEDULED: &str = "No shutdown is currently scheduled";
const CANCEL_STOP_OK: &str = "Shutdown cancelled successfully";
const CANCEL_STOP_FAILED: &str = "Failed to cancel shutdown - check server logs for details";

#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Period of the billing audit per verified participant.
    pub monitor_period_ticks: u64,
    /// Delay used by `GET /shutdown`.
    pub default_shutdown_delay: u64,
    /// Delay of the shutdown scheduled when the last participant leaves.
    pub grace_ticks: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            monitor_period_ticks: 36_000,
            default_shutdown_delay: 1_200,
            grace_ticks: 1_200,
        }
    }
}

/// Outcome of `/runCommand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub logger: String,
}

/// All control-plane state. Owned by the logic thread; other threads reach
/// it only through [`Scheduler`] closures.
pub struct ControlPlane<H: Host> {
    pub host: H,
    pub(crate) authority: Arc<dyn Authority>,
    pub(crate) tasks: Scheduler<ControlPlane<H>>,
    runtime: Handle,
    capture: LogCapture,
    pub(crate) settings: ControlSettings,
    pub(crate) shutdown: ShutdownScheduler,
    pub(crate) verification: VerificationManager,
    terminated: bool,
}

impl<H: Host> ControlPlane<H> {
    pub fn new(
        host: H,
        authority: Arc<dyn Authority>,
        tasks: Scheduler<ControlPlane<H>>,
        runtime: Handle,
        capture: LogCapture,
        settings: ControlSettings,
    ) -> Self {
        Self {
            host,
            authority,
            tasks,
            runtime,
            capture,
            settings,
            shutdown: ShutdownScheduler::default(),
            verification: VerificationManager::default(),
            terminated: false,
        }
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Scheduler<ControlPlane<H>> {
        &self.tasks
    }

    pub fn verification(&self) -> &VerificationManager {
        &self.verification
    }

    /// True once the terminal shutdown action ran.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn terminate(&mut self) {
        self.terminated = true;
        self.host.shutdown();
    }

    /// Run `call` against the authority on the worker pool, then hand the
    /// result to `then` on the logic thread.
    pub(crate) fn with_authority<Fut, R>(
        &self,
        call: impl FnOnce(Arc<dyn Authority>) -> Fut,
        then: impl FnOnce(&mut ControlPlane<H>, R) + Send + 'static,
    ) where
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let fut = call(Arc::clone(&self.authority));
        let tasks = self.tasks.clone();
        self.runtime.spawn(async move {
            let result = fut.await;
            tasks.run_now(move |plane| then(plane, result));
        });
    }

    /// Fire-and-forget authority call; failures are logged at warn.
    pub(crate) fn notify_authority<Fut, T>(&self, what: &'static str, call: impl FnOnce(Arc<dyn Authority>) -> Fut)
    where
        Fut: Future<Output = Result<T, authority::AuthorityError>> + Send + 'static,
    {
        let fut = call(Arc::clone(&self.authority));
        self.runtime.spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!(call = what, "authority call failed: {}", e);
            }
        });
    }

    /// Feed pending host events through the hooks. Called once per tick.
    pub fn pump(&mut self) {
        for event in self.host.poll_events() {
            match event {
                HostEvent::Joined(id) => self.on_participant_join(id),
                HostEvent::Left(participant) => self.on_participant_quit(participant),
                HostEvent::Chat { from, text } => {
                    if self.is_allowed(from, Capability::Chat) {
                        self.host.relay_chat(from, &text);
                    } else {
                        tracing::debug!(participant = %from, "chat blocked for unverified participant");
                    }
                }
                HostEvent::CancelStop(id) => self.cancel_stop_command(id),
            }
        }
    }

    pub fn on_participant_join(&mut self, id: ParticipantId) {
        let Some(participant) = self.host.find_by_id(id) else {
            return;
        };
        tracing::info!(participant = %id, name = %participant.name, "participant joined");
        self.host
            .send_message(id, Notice::plain(format!("Hello, {}!", participant.name)));
        self.handle_return_event();
        self.verify_participant(id);
    }

    pub fn on_participant_quit(&mut self, participant: Participant) {
        tracing::info!(participant = %participant.id, name = %participant.name, "participant left");
        self.host.send_message(
            participant.id,
            Notice::plain(format!("Goodbye, {}!", participant.name)),
        );
        self.stop_monitoring(participant.id);

        self.tasks.run_now(|plane| {
            if plane.host.participants().is_empty() {
                let grace = plane.settings.grace_ticks as i64;
                plane.schedule_shutdown(grace, true);
            }
        });
    }

    /// The participant-facing `/cancelstop` command.
    pub fn cancel_stop_command(&mut self, sender: ParticipantId) {
        if !self.host.has_permission(sender, CANCEL_STOP_PERMISSION) {
            self.host.send_message(sender, Notice::error(NO_PERMISSION));
            return;
        }
        if !self.has_scheduled_shutdown() {
            self.host
                .send_message(sender, Notice::warning(NO_SHUTDOWN_SCHEDULED));
            return;
        }
        self.cancel_shutdown_via_authority_then(sender, move |plane, cancelled| {
            let notice = if cancelled {
                Notice::success(CANCEL_STOP_OK)
            } else {
                Notice::error(CANCEL_STOP_FAILED)
            };
            plane.host.send_message(sender, notice);
        });
    }

    /// Dispatch `command` with output capture; `reply` is filled
    /// [`COMMAND_LOG_GRACE_TICKS`] ticks later. The capture is released on
    /// every path, including a panicking command.
    pub fn run_command(&mut self, command: String, reply: oneshot::Sender<CommandResult>) {
        tracing::info!(command = %command, "running remote command");
        let capture = self.capture.begin();
        let mut sink = CommandSink::new();
        let success = self.host.dispatch_command(&mut sink, &command);

        self.tasks.run_after(COMMAND_LOG_GRACE_TICKS, move |_plane| {
            let logger = capture.finish();
            let _ = reply.send(CommandResult {
                success,
                output: sink.into_output().trim().to_string(),
                logger: logger.trim().to_string(),
            });
        });
    }

    /// Send a one-time password to a connected participant.
    pub fn deliver_otp(&mut self, name: &str, otp: &str) -> Option<ParticipantId> {
        let participant = self.host.find_by_name(name)?;
        self.host
            .send_message(participant.id, Notice::plain(format!("Here's your OTP: {}", otp)));
        tracing::info!(participant = %participant.id, "delivered OTP");
        Some(participant.id)
    }

    /// The participant finished linking out of band; verify again.
    pub fn mark_registered(&mut self, id: ParticipantId) -> bool {
        if !self.host.is_connected(id) {
            return false;
        }
        self.verify_participant(id)
    }

    /// Terminal teardown: drop every monitor without remote calls.
    pub fn cleanup_all(&mut self) {
        self.verification.cleanup_all();
    }
}

//! Logic-thread control plane: shutdown scheduling, participant
//! verification and billing audits, and the capability gate, driven by a
//! [`Host`] implementation.

pub mod gate;
pub mod host;
pub mod plane;
pub mod shutdown;
pub mod verification;

#[cfg(test)]
mod test_support;

pub use gate::Capability;
pub use host::{CommandSink, Host, HostEvent, Notice, Tone};
pub use plane::{
    CommandResult, ControlPlane, ControlSettings, CANCEL_STOP_PERMISSION, COMMAND_LOG_GRACE_TICKS,
};
pub use shutdown::ShutdownScheduler;
pub use verification::{ParticipantSession, VerificationManager};

use std::collections::HashMap;
use std::time::Instant;

use authority::{AuthorityError, PlayRequest, VerifyRequest};
use engine_core::{Repeat, TaskHandle};
use session::ParticipantId;

use crate::host::{Host, Notice};
use crate::plane::ControlPlane;

const WELCOME: &str = "Welcome back to the server!";
const NOT_LINKED: &str =
    "You have not linked your account to Discord yet! Please use /link in the server!";
const VERIFY_ERROR: &str =
    "Verification error. Please try again later or contact the administrator.";
const NO_CREDITS: &str = "You have not enough credits to play on the server!";

#[derive(Debug)]
pub struct ParticipantSession {
    name: String,
    joined: Instant,
    verified: bool,
    monitor: Option<TaskHandle>,
    epoch: u64,
}

impl ParticipantSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Milliseconds since the session was opened.
    pub fn online_millis(&self) -> u64 {
        self.joined.elapsed().as_millis() as u64
    }
}

/// Per-participant verification state and billing monitors.
#[derive(Debug, Default)]
pub struct VerificationManager {
    sessions: HashMap<ParticipantId, ParticipantSession>,
    next_epoch: u64,
}

impl VerificationManager {
    /// Absent identities are unverified.
    pub fn is_verified(&self, id: ParticipantId) -> bool {
        self.sessions.get(&id).is_some_and(|s| s.verified)
    }

    pub fn session(&self, id: ParticipantId) -> Option<&ParticipantSession> {
        self.sessions.get(&id)
    }

    pub fn has_monitor(&self, id: ParticipantId) -> bool {
        self.sessions
            .get(&id)
            .and_then(|s| s.monitor.as_ref())
            .is_some_and(|h| !h.is_cancelled())
    }

    pub fn monitored_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.monitor.as_ref().is_some_and(|h| !h.is_cancelled()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session and monitor without contacting the authority.
    pub fn cleanup_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            if let Some(monitor) = session.monitor {
                monitor.cancel();
            }
        }
    }

    /// Open a fresh unverified session, replacing (and un-monitoring) any
    /// previous one. Returns the session's epoch.
    fn open(&mut self, id: ParticipantId, name: String) -> u64 {
        self.next_epoch += 1;
        let session = ParticipantSession {
            name,
            joined: Instant::now(),
            verified: false,
            monitor: None,
            epoch: self.next_epoch,
        };
        if let Some(old) = self.sessions.insert(id, session) {
            if let Some(monitor) = old.monitor {
                monitor.cancel();
            }
        }
        self.next_epoch
    }

    fn current(&mut self, id: ParticipantId, epoch: u64) -> Option<&mut ParticipantSession> {
        self.sessions.get_mut(&id).filter(|s| s.epoch == epoch)
    }
}

impl<H: Host> ControlPlane<H> {
    pub fn is_verified(&self, id: ParticipantId) -> bool {
        self.verification.is_verified(id)
    }

    /// Start (or restart) verification for a connected participant. The
    /// participant is hidden until the authority answers.
    pub fn verify_participant(&mut self, id: ParticipantId) -> bool {
        let Some(participant) = self.host.find_by_id(id) else {
            return false;
        };
        tracing::info!(participant = %id, name = %participant.name, "verifying participant");

        let epoch = self.verification.open(id, participant.name.clone());
        self.host.set_visible(id, false);

        let req = VerifyRequest {
            uuid: id,
            player_name: participant.name,
            server_port: self.host.server_port(),
        };
        self.with_authority(
            move |auth| async move { auth.verify(req).await },
            move |plane, result| plane.finish_verify(id, epoch, result),
        );
        true
    }

    fn finish_verify(&mut self, id: ParticipantId, epoch: u64, result: Result<bool, AuthorityError>) {
        if self.verification.current(id, epoch).is_none() {
            tracing::debug!(participant = %id, "discarding stale verification result");
            return;
        }
        if !self.host.is_connected(id) {
            return;
        }

        match result {
            Ok(true) => {
                if let Some(session) = self.verification.current(id, epoch) {
                    session.verified = true;
                }
                tracing::info!(participant = %id, "participant verified");
                self.host.set_visible(id, true);
                self.host.send_message(id, Notice::plain(WELCOME));
                self.start_monitoring(id);
            }
            Ok(false) | Err(AuthorityError::Status(_)) => {
                tracing::info!(participant = %id, "participant not linked");
                self.host.send_message(id, Notice::critical(NOT_LINKED));
            }
            Err(e) => {
                tracing::error!(participant = %id, "error verifying participant: {}", e);
                self.host.disconnect(id, VERIFY_ERROR);
            }
        }
    }

    fn start_monitoring(&mut self, id: ParticipantId) {
        let period = self.settings.monitor_period_ticks;
        let Some(session) = self.verification.sessions.get_mut(&id) else {
            return;
        };
        if let Some(previous) = session.monitor.take() {
            previous.cancel();
        }
        let handle = self
            .tasks
            .run_repeating(0, period, move |plane| plane.audit(id));
        session.monitor = Some(handle);
    }

    /// One billing round for `id`.
    fn audit(&mut self, id: ParticipantId) -> Repeat {
        if !self.host.is_connected(id) {
            self.stop_monitoring(id);
            return Repeat::Stop;
        }
        let Some(session) = self.verification.session(id) else {
            return Repeat::Stop;
        };
        let req = PlayRequest {
            uuid: id,
            player_name: session.name.clone(),
            server_port: self.host.server_port(),
            online_time: session.online_millis(),
            disconnect: false,
        };

        self.with_authority(
            move |auth| async move { auth.play(req).await },
            move |plane, result| match result {
                Ok(true) => {
                    if plane.host.is_connected(id) {
                        tracing::info!(participant = %id, "kicking participant: out of credits");
                        plane.host.disconnect(id, NO_CREDITS);
                    }
                }
                Ok(false) | Err(AuthorityError::Status(_)) => {}
                Err(e) => {
                    tracing::warn!(participant = %id, "error calling play endpoint: {}", e);
                }
            },
        );
        Repeat::Continue
    }

    /// Final audit, cancel the monitor, forget the session. Idempotent.
    pub fn stop_monitoring(&mut self, id: ParticipantId) {
        let Some(session) = self.verification.sessions.remove(&id) else {
            return;
        };
        if let Some(monitor) = &session.monitor {
            monitor.cancel();
        }

        let req = PlayRequest {
            uuid: id,
            player_name: session.name.clone(),
            server_port: self.host.server_port(),
            online_time: session.online_millis(),
            disconnect: true,
        };
        self.notify_authority("play", move |auth| async move { auth.play(req).await });
        tracing::debug!(participant = %id, "monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use authority::mock::Reply;

    #[test]
    fn unknown_identity_is_unverified() {
        let mut h = Harness::new();
        assert!(!h.plane().is_verified(ParticipantId::random()));
        assert_eq!(h.plane().verification().monitored_count(), 0);
    }

    #[test]
    fn unresolved_verification_is_unverified() {
        let mut h = Harness::new();
        h.auth.hold_verify();
        let alice = h.connect("alice");
        assert!(h.plane().verify_participant(alice));
        h.step(10);
        assert!(!h.plane().is_verified(alice));
        assert_eq!(h.plane().host.visibility.get(&alice), Some(&false));

        h.auth.release_verify();
        assert!(h.run_until(|p| p.is_verified(alice)));
        assert_eq!(h.plane().host.visibility.get(&alice), Some(&true));
    }

    #[test]
    fn success_starts_monitor_and_audits() {
        let mut h = Harness::new();
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.is_verified(alice)));
        assert!(h.plane().verification().has_monitor(alice));
        assert!(h.plane().host.messages_to(alice).iter().any(|n| n.text == WELCOME));

        let auth = h.auth.clone();
        assert!(h.run_until(|_| !auth.play_calls().is_empty()));
        let first = &auth.play_calls()[0];
        assert_eq!(first.player_name, "alice");
        assert_eq!(first.server_port, 4000);
        assert!(!first.disconnect);
    }

    #[test]
    fn denial_keeps_participant_connected_and_gated() {
        let mut h = Harness::new();
        h.auth.set_verify(Reply::No);
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.host.messages_to(alice).iter().any(|n| n.text == NOT_LINKED)));

        assert!(!h.plane().is_verified(alice));
        assert!(!h.plane().verification().has_monitor(alice));
        assert!(h.plane().host.disconnects.is_empty());
        assert_eq!(h.plane().host.visibility.get(&alice), Some(&false));
    }

    #[test]
    fn status_error_is_a_denial() {
        let mut h = Harness::new();
        h.auth.set_verify(Reply::Status(500));
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.host.messages_to(alice).iter().any(|n| n.text == NOT_LINKED)));
        assert!(h.plane().host.disconnects.is_empty());
    }

    #[test]
    fn transport_error_disconnects() {
        let mut h = Harness::new();
        h.auth.set_verify(Reply::Unreachable);
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| !p.host.disconnects.is_empty()));
        assert_eq!(h.plane().host.disconnects, vec![(alice, VERIFY_ERROR.to_string())]);
        assert!(!h.plane().is_verified(alice));
    }

    #[test]
    fn stale_result_is_discarded() {
        let mut h = Harness::new();
        h.auth.hold_verify();
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        h.plane().stop_monitoring(alice);
        h.auth.release_verify();

        // The verify answer arrives for a session that no longer exists.
        h.settle();
        assert!(!h.plane().is_verified(alice));
        assert!(h.plane().verification().session(alice).is_none());
    }

    #[test]
    fn reverify_replaces_monitor() {
        let mut h = Harness::new();
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.verification().has_monitor(alice)));

        h.auth.hold_verify();
        h.plane().verify_participant(alice);
        assert!(!h.plane().is_verified(alice));
        assert_eq!(h.plane().verification().monitored_count(), 0);

        h.auth.release_verify();
        assert!(h.run_until(|p| p.verification().has_monitor(alice)));
        assert_eq!(h.plane().verification().monitored_count(), 1);
    }

    #[test]
    fn kick_disconnects_connected_participant() {
        let mut h = Harness::new();
        h.auth.set_play(Reply::Yes);
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| !p.host.disconnects.is_empty()));
        assert_eq!(h.plane().host.disconnects[0], (alice, NO_CREDITS.to_string()));
    }

    #[test]
    fn audit_failure_is_swallowed() {
        let mut h = Harness::new();
        h.auth.set_play(Reply::Unreachable);
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.is_verified(alice)));
        h.settle();
        assert!(h.plane().host.disconnects.is_empty());
        assert!(h.plane().verification().has_monitor(alice));
    }

    #[test]
    fn stop_monitoring_sends_final_audit_once() {
        let mut h = Harness::new();
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.verification().has_monitor(alice)));

        h.plane().stop_monitoring(alice);
        h.plane().stop_monitoring(alice);
        assert!(!h.plane().is_verified(alice));
        assert!(!h.plane().verification().has_monitor(alice));
        h.settle();

        let finals: Vec<_> = h
            .auth
            .play_calls()
            .into_iter()
            .filter(|req| req.disconnect)
            .collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].player_name, "alice");
    }

    #[test]
    fn departed_participant_stops_its_monitor() {
        let mut h = Harness::new();
        h.plane().settings.monitor_period_ticks = 5;
        let alice = h.connect("alice");
        h.plane().verify_participant(alice);
        assert!(h.run_until(|p| p.verification().has_monitor(alice)));

        h.plane().host.remove(alice);
        h.step(10);
        assert!(h.plane().verification().session(alice).is_none());
        assert_eq!(h.plane().verification().monitored_count(), 0);
    }

    #[test]
    fn cleanup_all_makes_no_calls() {
        let mut h = Harness::new();
        let alice = h.connect("alice");
        let bob = h.connect("bob");
        h.plane().verify_participant(alice);
        h.plane().verify_participant(bob);
        assert!(h.run_until(|p| p.verification().monitored_count() == 2));
        h.settle();
        let before = h.auth.calls().len();

        h.plane().cleanup_all();
        h.settle();
        assert!(h.plane().verification().is_empty());
        assert_eq!(h.auth.calls().len(), before);
    }
}

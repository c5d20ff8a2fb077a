//! In-memory [`Authority`] with scripted answers and a call log.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{Authority, AuthorityError, CancelShutdownRequest, PlayRequest, VerifyRequest};

/// Scripted answer for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Yes,
    No,
    /// Non-200 status.
    Status(u16),
    /// Connection-level failure.
    Unreachable,
}

impl Reply {
    fn resolve(self) -> Result<bool, AuthorityError> {
        match self {
            Reply::Yes => Ok(true),
            Reply::No => Ok(false),
            Reply::Status(code) => Err(AuthorityError::Status(code)),
            Reply::Unreachable => Err(AuthorityError::Transport("connection refused".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCall {
    Verify(VerifyRequest),
    Play(PlayRequest),
    CancelShutdown(CancelShutdownRequest),
}

struct Script {
    verify: Reply,
    play: Reply,
    cancel_shutdown: Reply,
    calls: Vec<AuthorityCall>,
}

pub struct MockAuthority {
    script: Mutex<Script>,
    /// `verify` blocks while this is false.
    verify_open: watch::Sender<bool>,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthority {
    /// Grants verification, never kicks, denies cancellation.
    pub fn new() -> Self {
        let (verify_open, _) = watch::channel(true);
        Self {
            script: Mutex::new(Script {
                verify: Reply::Yes,
                play: Reply::No,
                cancel_shutdown: Reply::No,
                calls: Vec::new(),
            }),
            verify_open,
        }
    }

    pub fn set_verify(&self, reply: Reply) {
        self.lock().verify = reply;
    }

    pub fn set_play(&self, reply: Reply) {
        self.lock().play = reply;
    }

    pub fn set_cancel_shutdown(&self, reply: Reply) {
        self.lock().cancel_shutdown = reply;
    }

    /// Park every `verify` call until [`release_verify`](Self::release_verify).
    pub fn hold_verify(&self) {
        self.verify_open.send_replace(false);
    }

    pub fn release_verify(&self) {
        self.verify_open.send_replace(true);
    }

    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.lock().calls.clone()
    }

    pub fn play_calls(&self) -> Vec<PlayRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                AuthorityCall::Play(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Authority for MockAuthority {
    async fn verify(&self, req: VerifyRequest) -> Result<bool, AuthorityError> {
        self.lock().calls.push(AuthorityCall::Verify(req));
        let mut open = self.verify_open.subscribe();
        loop {
            let ready = *open.borrow_and_update();
            if ready || open.changed().await.is_err() {
                break;
            }
        }
        self.lock().verify.resolve()
    }

    async fn play(&self, req: PlayRequest) -> Result<bool, AuthorityError> {
        let disconnect = req.disconnect;
        let reply = {
            let mut script = self.lock();
            script.calls.push(AuthorityCall::Play(req));
            script.play
        };
        if disconnect {
            return reply.resolve().map(|_| false);
        }
        reply.resolve()
    }

    async fn cancel_shutdown(&self, req: CancelShutdownRequest) -> Result<bool, AuthorityError> {
        let mut script = self.lock();
        script.calls.push(AuthorityCall::CancelShutdown(req));
        script.cancel_shutdown.resolve()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use authority::mock::MockAuthority;
use control::{CommandSink, ControlPlane, ControlSettings, Host, Notice};
use engine_core::{task_queue, TickConfig, TickLoop};
use observability::{LogCapture, LogRing};
use session::{Participant, ParticipantId, PermissionLevel, SessionId};

use super::BridgeRouter;

#[derive(Default)]
pub struct RosterHost {
    roster: Vec<Participant>,
    messages: Vec<(ParticipantId, String)>,
}

impl RosterHost {
    fn add(&mut self, name: &str) -> ParticipantId {
        let id = ParticipantId::from_name(name);
        self.roster.push(Participant {
            id,
            name: name.to_string(),
            session_id: SessionId(self.roster.len() as u64 + 1),
            permission: PermissionLevel::Player,
            visible: true,
        });
        id
    }
}

impl Host for RosterHost {
    fn broadcast(&mut self, _notice: Notice) {}

    fn send_message(&mut self, to: ParticipantId, notice: Notice) {
        self.messages.push((to, notice.text));
    }

    fn disconnect(&mut self, id: ParticipantId, _reason: &str) {
        self.roster.retain(|p| p.id != id);
    }

    fn set_visible(&mut self, _id: ParticipantId, _visible: bool) {}

    fn dispatch_command(&mut self, sink: &mut CommandSink, command: &str) -> bool {
        match command.split_once(' ') {
            Some(("echo", rest)) => {
                sink.send(rest.trim());
                true
            }
            _ if command == "panic" => panic!("command blew up"),
            _ => false,
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.roster.clone()
    }

    fn find_by_name(&self, name: &str) -> Option<Participant> {
        self.roster.iter().find(|p| p.name.eq_ignore_ascii_case(name)).cloned()
    }

    fn find_by_id(&self, id: ParticipantId) -> Option<Participant> {
        self.roster.iter().find(|p| p.id == id).cloned()
    }

    fn has_permission(&self, _id: ParticipantId, _permission: &str) -> bool {
        false
    }

    fn extensions(&self) -> Vec<String> {
        vec!["connector".to_string()]
    }

    fn server_port(&self) -> u16 {
        4000
    }

    fn shutdown(&mut self) {}
}

/// A router in front of a live logic thread. Must be started inside a
/// tokio runtime; authority calls run on it.
pub struct Bench {
    pub router: BridgeRouter<RosterHost>,
    pub logs: LogRing,
    pub auth: Arc<MockAuthority>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Bench {
    pub fn start() -> Self {
        let (tasks, queue) = task_queue();
        let auth = Arc::new(MockAuthority::new());
        let logs = LogRing::in_memory(16);
        let plane = ControlPlane::new(
            RosterHost::default(),
            auth.clone(),
            tasks.clone(),
            tokio::runtime::Handle::current(),
            LogCapture::new(),
            ControlSettings::default(),
        );
        let config = TickConfig {
            tps: 100,
            max_ticks: 0,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = std::thread::spawn(move || {
            let mut tick = TickLoop::new(config, plane, queue);
            tick.run_while(|plane| {
                plane.pump();
                !flag.load(Ordering::Acquire)
            });
        });
        Self {
            router: BridgeRouter::new(tasks, logs.clone(), 1200),
            logs,
            auth,
            stop,
            thread: Some(thread),
        }
    }

    pub async fn join(&self, name: &str) -> ParticipantId {
        let name = name.to_string();
        self.router
            .scheduler()
            .call(move |plane| plane.host.add(&name))
            .await
            .unwrap()
    }

    pub async fn messages_to(&self, id: ParticipantId) -> Vec<String> {
        self.router
            .scheduler()
            .call(move |plane| {
                plane
                    .host
                    .messages
                    .iter()
                    .filter(|(to, _)| *to == id)
                    .map(|(_, text)| text.clone())
                    .collect()
            })
            .await
            .unwrap()
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.halt();
    }
}

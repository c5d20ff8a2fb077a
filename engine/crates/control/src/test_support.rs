use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use authority::mock::MockAuthority;
use engine_core::{task_queue, Scheduler, TickConfig, TickLoop};
use observability::LogCapture;
use session::{Participant, ParticipantId, PermissionLevel, SessionId};

use crate::host::{CommandSink, Host, HostEvent, Notice};
use crate::plane::{ControlPlane, ControlSettings, CANCEL_STOP_PERMISSION};

#[derive(Default)]
pub struct FakeHost {
    pub roster: Vec<Participant>,
    pub broadcasts: Vec<Notice>,
    pub messages: Vec<(ParticipantId, Notice)>,
    pub disconnects: Vec<(ParticipantId, String)>,
    pub visibility: HashMap<ParticipantId, bool>,
    pub relayed: Vec<(ParticipantId, String)>,
    pub events: Vec<HostEvent>,
    pub operators: HashSet<ParticipantId>,
    pub shutdowns: usize,
    next_session: u64,
}

impl FakeHost {
    pub fn add(&mut self, name: &str, permission: PermissionLevel) -> ParticipantId {
        let id = ParticipantId::from_name(name);
        self.next_session += 1;
        self.roster.push(Participant {
            id,
            name: name.to_string(),
            session_id: SessionId(self.next_session),
            permission,
            visible: true,
        });
        if permission == PermissionLevel::Operator {
            self.operators.insert(id);
        }
        id
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let idx = self.roster.iter().position(|p| p.id == id)?;
        Some(self.roster.remove(idx))
    }

    pub fn broadcast_texts(&self) -> Vec<String> {
        self.broadcasts.iter().map(|n| n.text.clone()).collect()
    }

    pub fn messages_to(&self, id: ParticipantId) -> Vec<Notice> {
        self.messages
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

impl Host for FakeHost {
    fn broadcast(&mut self, notice: Notice) {
        self.broadcasts.push(notice);
    }

    fn send_message(&mut self, to: ParticipantId, notice: Notice) {
        self.messages.push((to, notice));
    }

    fn disconnect(&mut self, id: ParticipantId, reason: &str) {
        self.disconnects.push((id, reason.to_string()));
        self.remove(id);
    }

    fn set_visible(&mut self, id: ParticipantId, visible: bool) {
        self.visibility.insert(id, visible);
    }

    fn dispatch_command(&mut self, sink: &mut CommandSink, command: &str) -> bool {
        let (name, args) = command
            .trim()
            .split_once(' ')
            .unwrap_or((command.trim(), ""));
        match name {
            "echo" => {
                sink.send(args.trim());
                tracing::info!("echoed {}", args.trim());
                true
            }
            "panic" => panic!("command blew up"),
            _ => false,
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.roster.clone()
    }

    fn find_by_name(&self, name: &str) -> Option<Participant> {
        self.roster
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn find_by_id(&self, id: ParticipantId) -> Option<Participant> {
        self.roster.iter().find(|p| p.id == id).cloned()
    }

    fn has_permission(&self, id: ParticipantId, permission: &str) -> bool {
        permission == CANCEL_STOP_PERMISSION && self.operators.contains(&id)
    }

    fn extensions(&self) -> Vec<String> {
        vec!["connector".to_string()]
    }

    fn server_port(&self) -> u16 {
        4000
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }

    fn relay_chat(&mut self, from: ParticipantId, text: &str) {
        self.relayed.push((from, text.to_string()));
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }
}

/// A control plane on a manually stepped tick loop, with authority calls
/// running on a private runtime.
pub struct Harness {
    pub tick: TickLoop<ControlPlane<FakeHost>>,
    pub tasks: Scheduler<ControlPlane<FakeHost>>,
    pub auth: Arc<MockAuthority>,
    pub capture: LogCapture,
    _runtime: tokio::runtime::Runtime,
}

impl Harness {
    pub fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (tasks, queue) = task_queue();
        let auth = Arc::new(MockAuthority::new());
        let capture = LogCapture::new();
        let plane = ControlPlane::new(
            FakeHost::default(),
            auth.clone(),
            tasks.clone(),
            runtime.handle().clone(),
            capture.clone(),
            ControlSettings::default(),
        );
        Self {
            tick: TickLoop::new(TickConfig::default(), plane, queue),
            tasks,
            auth,
            capture,
            _runtime: runtime,
        }
    }

    pub fn plane(&mut self) -> &mut ControlPlane<FakeHost> {
        &mut self.tick.ctx
    }

    pub fn connect(&mut self, name: &str) -> ParticipantId {
        self.plane().host.add(name, PermissionLevel::Player)
    }

    pub fn connect_operator(&mut self, name: &str) -> ParticipantId {
        self.plane().host.add(name, PermissionLevel::Operator)
    }

    pub fn step(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick.step();
        }
    }

    /// Step ticks until `pred` holds, giving worker tasks time to finish.
    /// Returns false after two seconds.
    pub fn run_until(&mut self, mut pred: impl FnMut(&ControlPlane<FakeHost>) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pred(&self.tick.ctx) {
                return true;
            }
            self.tick.step();
            std::thread::sleep(Duration::from_millis(1));
        }
        pred(&self.tick.ctx)
    }

    /// Let in-flight worker tasks land.
    pub fn settle(&mut self) {
        for _ in 0..20 {
            self.tick.step();
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

//! Reference [`Host`] over the line gateway: participants connect with any
//! line-based client, name themselves, then chat or use slash commands.

use std::collections::{HashMap, HashSet};

use control::{CommandSink, Host, HostEvent, Notice};
use net::ansi::paint;
use net::channels::{EventRx, GatewayEvent, OutputTx};
use session::{
    ConnectionState, JoinError, Participant, ParticipantId, ParticipantRegistry, PermissionLevel,
    SessionId, SessionOutput,
};
use tokio::sync::mpsc::error::TryRecvError;

const NAME_PROMPT: &str = "Enter your name:";
const KICKED: &str = "Kicked by an operator.";
const SERVER_CLOSED: &str = "Server closed";

const HELP: &[&str] = &[
    "list - show who is online",
    "say <message> - broadcast a server message",
    "kick <name> - disconnect a participant",
    "stop - stop the server",
];

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub server_port: u16,
    /// Names (any case) that join with operator rights.
    pub operators: Vec<String>,
    pub extensions: Vec<String>,
}

pub struct TelnetHost {
    registry: ParticipantRegistry,
    events: EventRx,
    output: OutputTx,
    /// Events raised by the host itself (kicks), delivered on the next poll.
    raised: Vec<HostEvent>,
    /// Participants that left during the current poll, kept so the goodbye
    /// still reaches their connection.
    departed: HashMap<ParticipantId, SessionId>,
    operators: HashSet<String>,
    extensions: Vec<String>,
    server_port: u16,
    roster_requested: bool,
    stopped: bool,
}

impl TelnetHost {
    pub fn new(events: EventRx, output: OutputTx, options: HostOptions) -> Self {
        Self {
            registry: ParticipantRegistry::new(),
            events,
            output,
            raised: Vec::new(),
            departed: HashMap::new(),
            operators: options
                .operators
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            extensions: options.extensions,
            server_port: options.server_port,
            roster_requested: false,
            stopped: false,
        }
    }

    /// True once [`Host::shutdown`] ran or the `stop` command was issued.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn write(&self, session_id: SessionId, text: impl Into<String>) {
        let _ = self.output.send(SessionOutput::new(session_id, text));
    }

    fn handle(&mut self, event: GatewayEvent, out: &mut Vec<HostEvent>) {
        match event {
            GatewayEvent::Opened { session_id, peer } => {
                tracing::debug!(%session_id, %peer, "awaiting name");
                self.registry.connect(session_id);
                self.write(session_id, NAME_PROMPT);
            }
            GatewayEvent::Line { session_id, line } => match self.registry.state(session_id) {
                Some(ConnectionState::AwaitingName) => self.join(session_id, &line, out),
                Some(ConnectionState::Active(id)) => self.participant_line(id, line.trim(), out),
                None => {}
            },
            GatewayEvent::Closed { session_id } => {
                if let Some(participant) = self.registry.disconnect(session_id) {
                    self.departed.insert(participant.id, session_id);
                    out.push(HostEvent::Left(participant));
                }
            }
        }
    }

    fn join(&mut self, session_id: SessionId, name: &str, out: &mut Vec<HostEvent>) {
        let permission = if self.operators.contains(&name.trim().to_ascii_lowercase()) {
            PermissionLevel::Operator
        } else {
            PermissionLevel::Player
        };
        match self.registry.join(session_id, name, permission) {
            Ok(participant) => out.push(HostEvent::Joined(participant.id)),
            Err(JoinError::InvalidName(_)) => {
                self.write(session_id, "Names are 1-16 letters, digits or underscores.");
                self.write(session_id, NAME_PROMPT);
            }
            Err(JoinError::NameTaken(name)) => {
                self.write(session_id, format!("{name} is already online."));
                self.write(session_id, NAME_PROMPT);
            }
            Err(e) => tracing::warn!(%session_id, "join failed: {}", e),
        }
    }

    fn participant_line(&mut self, id: ParticipantId, line: &str, out: &mut Vec<HostEvent>) {
        match line {
            "" => {}
            "/cancelstop" => out.push(HostEvent::CancelStop(id)),
            "/quit" => {
                if let Some(participant) = self.registry.get(id).cloned() {
                    self.registry.disconnect(participant.session_id);
                    self.departed.insert(id, participant.session_id);
                    out.push(HostEvent::Left(participant));
                }
            }
            cmd if cmd.starts_with('/') => {
                self.send_message(id, Notice::error(format!("Unknown command: {cmd}")));
            }
            text => out.push(HostEvent::Chat {
                from: id,
                text: text.to_string(),
            }),
        }
    }

    fn log_roster(&self) {
        let names: Vec<&str> = self
            .registry
            .participants()
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        tracing::info!("There are {} participants online: {}", names.len(), names.join(", "));
    }
}

impl Host for TelnetHost {
    fn broadcast(&mut self, notice: Notice) {
        tracing::info!("[broadcast] {}", notice.text);
        let text = paint(notice.tone, &notice.text);
        for participant in self.registry.participants() {
            self.write(participant.session_id, text.clone());
        }
    }

    fn send_message(&mut self, to: ParticipantId, notice: Notice) {
        let text = paint(notice.tone, &notice.text);
        if let Some(participant) = self.registry.get(to) {
            self.write(participant.session_id, text);
        } else if let Some(session_id) = self.departed.remove(&to) {
            let _ = self.output.send(SessionOutput::with_disconnect(session_id, text));
        }
    }

    fn disconnect(&mut self, id: ParticipantId, reason: &str) {
        let Some(session_id) = self.registry.get(id).map(|p| p.session_id) else {
            return;
        };
        tracing::info!(participant = %id, reason, "disconnecting participant");
        let _ = self.output.send(SessionOutput::with_disconnect(session_id, reason));
        if let Some(participant) = self.registry.disconnect(session_id) {
            self.raised.push(HostEvent::Left(participant));
        }
    }

    fn set_visible(&mut self, id: ParticipantId, visible: bool) {
        if let Some(participant) = self.registry.get_mut(id) {
            participant.visible = visible;
        }
    }

    fn dispatch_command(&mut self, sink: &mut CommandSink, command: &str) -> bool {
        let command = command.trim().trim_start_matches('/');
        let (name, args) = command.split_once(' ').unwrap_or((command, ""));
        let args = args.trim();
        match name {
            "list" => {
                self.roster_requested = true;
                true
            }
            "say" if !args.is_empty() => {
                self.broadcast(Notice::plain(format!("[Server] {args}")));
                true
            }
            "say" => {
                sink.send("Usage: say <message>");
                false
            }
            "kick" => match self.registry.find_by_name(args).map(|p| (p.id, p.name.clone())) {
                Some((id, name)) => {
                    self.disconnect(id, KICKED);
                    sink.send(format!("Kicked {name}"));
                    true
                }
                None => {
                    sink.send("No participant was found");
                    false
                }
            },
            "help" => {
                for line in HELP {
                    sink.send(line);
                }
                true
            }
            "stop" => {
                sink.send("Stopping the server");
                self.shutdown();
                true
            }
            _ => false,
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.registry.participants().into_iter().cloned().collect()
    }

    fn find_by_name(&self, name: &str) -> Option<Participant> {
        self.registry.find_by_name(name).cloned()
    }

    fn find_by_id(&self, id: ParticipantId) -> Option<Participant> {
        self.registry.get(id).cloned()
    }

    fn has_permission(&self, id: ParticipantId, _permission: &str) -> bool {
        self.registry
            .get(id)
            .is_some_and(|p| p.permission == PermissionLevel::Operator)
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn server_port(&self) -> u16 {
        self.server_port
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!("host stopping");
        for session_id in self.registry.all_session_ids() {
            let _ = self
                .output
                .send(SessionOutput::with_disconnect(session_id, SERVER_CLOSED));
        }
        self.stopped = true;
    }

    fn relay_chat(&mut self, from: ParticipantId, text: &str) {
        let Some(sender) = self.registry.get(from) else {
            return;
        };
        if !sender.visible {
            return;
        }
        let line = format!("<{}> {}", sender.name, text);
        tracing::info!("{}", line);
        for participant in self.registry.participants() {
            if participant.visible || participant.id == from {
                self.write(participant.session_id, line.clone());
            }
        }
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        self.departed.clear();
        if std::mem::take(&mut self.roster_requested) {
            self.log_roster();
        }

        let mut out = std::mem::take(&mut self.raised);
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle(event, &mut out),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.stopped {
                        tracing::warn!("line gateway closed");
                    }
                    break;
                }
            }
        }
        out
    }
}

use session::{Participant, ParticipantId};

/// How a notice should be rendered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Success,
    Warning,
    Error,
    Critical,
}

/// A user-facing line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub tone: Tone,
}

impl Notice {
    pub fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(Tone::Plain, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(Tone::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Tone::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Tone::Error, text)
    }

    pub fn critical(text: impl Into<String>) -> Self {
        Self::new(Tone::Critical, text)
    }
}

/// Receives the direct output of a dispatched console command.
#[derive(Debug, Default)]
pub struct CommandSink {
    output: String,
}

impl CommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, line: impl AsRef<str>) {
        self.output.push_str(line.as_ref());
        self.output.push('\n');
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }
}

/// Participant activity the host reports to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Joined(ParticipantId),
    /// Already removed from the host's roster.
    Left(Participant),
    Chat { from: ParticipantId, text: String },
    CancelStop(ParticipantId),
}

/// Everything the control plane needs from the host application.
///
/// Every method is called on the logic thread.
pub trait Host: Send + 'static {
    fn broadcast(&mut self, notice: Notice);

    fn send_message(&mut self, to: ParticipantId, notice: Notice);

    fn disconnect(&mut self, id: ParticipantId, reason: &str);

    /// Show or hide a participant to and from everyone else.
    fn set_visible(&mut self, id: ParticipantId, visible: bool);

    /// Run a console command. Returns whether the command was recognised.
    fn dispatch_command(&mut self, sink: &mut CommandSink, command: &str) -> bool;

    fn participants(&self) -> Vec<Participant>;

    fn find_by_name(&self, name: &str) -> Option<Participant>;

    fn find_by_id(&self, id: ParticipantId) -> Option<Participant>;

    fn is_connected(&self, id: ParticipantId) -> bool {
        self.find_by_id(id).is_some()
    }

    fn has_permission(&self, id: ParticipantId, permission: &str) -> bool;

    /// Names of loaded extensions.
    fn extensions(&self) -> Vec<String>;

    fn server_port(&self) -> u16;

    /// Terminal action. The host stops after the current tick.
    fn shutdown(&mut self);

    /// Deliver chat that already passed the capability gate.
    fn relay_chat(&mut self, _from: ParticipantId, _text: &str) {}

    /// Drain pending participant events.
    fn poll_events(&mut self) -> Vec<HostEvent> {
        Vec::new()
    }
}

//! Line framing for raw TCP and telnet clients.

const IAC: u8 = 255;
const WILL: u8 = 251;
const WONT: u8 = 252;
const DO: u8 = 253;
const DONT: u8 = 254;
const SB: u8 = 250;
const SE: u8 = 240;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Longest line kept; extra bytes are dropped until the next newline.
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Telnet {
    #[default]
    Data,
    Iac,
    Negotiate,
    Sub,
    SubIac,
}

/// Splits a byte stream into lines, removing telnet negotiation.
///
/// Negotiation sequences may be split across reads; the decoder state
/// survives between calls to [`LineBuffer::feed`]. Backspace and delete
/// edit the pending line, and `\r` is ignored.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    state: Telnet,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes. Returns the lines completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            self.state = match (self.state, byte) {
                (Telnet::Data, IAC) => Telnet::Iac,
                (Telnet::Data, b'\n') => {
                    lines.push(self.take_line());
                    Telnet::Data
                }
                (Telnet::Data, b'\r') => Telnet::Data,
                (Telnet::Data, BACKSPACE | DELETE) => {
                    self.buf.pop();
                    Telnet::Data
                }
                (Telnet::Data, b) => {
                    if self.buf.len() < MAX_LINE_LEN {
                        self.buf.push(b);
                    }
                    Telnet::Data
                }
                (Telnet::Iac, IAC) => {
                    if self.buf.len() < MAX_LINE_LEN {
                        self.buf.push(IAC);
                    }
                    Telnet::Data
                }
                (Telnet::Iac, WILL | WONT | DO | DONT) => Telnet::Negotiate,
                (Telnet::Iac, SB) => Telnet::Sub,
                (Telnet::Iac, _) | (Telnet::Negotiate, _) => Telnet::Data,
                (Telnet::Sub, IAC) => Telnet::SubIac,
                (Telnet::Sub, _) => Telnet::Sub,
                (Telnet::SubIac, SE) => Telnet::Data,
                (Telnet::SubIac, _) => Telnet::Sub,
            };
        }
        lines
    }

    /// Bytes of the unfinished line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Normalize outgoing text to CRLF line endings with a trailing CRLF.
pub fn to_wire(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\n', "\r\n");
    out.push_str("\r\n");
    out
}

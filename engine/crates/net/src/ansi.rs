//! ANSI coloring for participant-facing notices.

use control::Tone;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BRIGHT_RED: &str = "\x1b[91m";

/// Escape prefix for a tone, or `None` for plain text.
pub fn tone_style(tone: Tone) -> Option<&'static str> {
    match tone {
        Tone::Plain => None,
        Tone::Success => Some(GREEN),
        Tone::Warning => Some(YELLOW),
        Tone::Error => Some(RED),
        Tone::Critical => Some("\x1b[1m\x1b[91m"),
    }
}

/// Render `text` in the style of `tone`, resetting afterwards.
pub fn paint(tone: Tone, text: &str) -> String {
    match tone_style(tone) {
        Some(style) => format!("{style}{text}{RESET}"),
        None => text.to_string(),
    }
}

/// Remove `ESC [ ... final` sequences.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if ('\x40'..='\x7e').contains(&c) {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

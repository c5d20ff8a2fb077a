//! Text framing of the local-socket transport.
//!
//! A request is `METHOD SP PATH`, optionally followed by `\n` and a raw
//! body. A response is the decimal status, `\n`, then the body.

use super::router::{Request, Response};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("request is not valid UTF-8")]
    Encoding,

    #[error("malformed request line")]
    RequestLine,
}

pub fn parse_request(raw: &[u8]) -> Result<Request, FrameError> {
    let text = std::str::from_utf8(raw).map_err(|_| FrameError::Encoding)?;
    let (head, body) = text.split_once('\n').unwrap_or((text, ""));
    let (method, path) = head
        .trim()
        .split_once(' ')
        .ok_or(FrameError::RequestLine)?;
    let path = path.trim();
    if method.is_empty() || path.is_empty() {
        return Err(FrameError::RequestLine);
    }
    Ok(Request::new(method, path, body.trim()))
}

/// Whether `raw` already holds a whole request, so the reader can answer
/// without waiting for the client to go quiet. GET-style requests end with
/// a terminated request line; POST requests end once the body is a complete
/// JSON value.
pub fn request_complete(raw: &[u8]) -> bool {
    let Ok(req) = parse_request(raw) else {
        return false;
    };
    if req.body.is_empty() {
        return req.method != "POST" && raw.contains(&b'\n');
    }
    serde_json::from_str::<serde::de::IgnoredAny>(&req.body).is_ok()
}

pub fn encode_response(resp: &Response) -> Vec<u8> {
    format!("{}\n{}", resp.status, resp.body).into_bytes()
}

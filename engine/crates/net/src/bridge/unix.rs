use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use control::Host;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use super::framing::{encode_response, parse_request, request_complete};
use super::router::{BridgeRouter, Response};
use super::BridgeError;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
/// How long a client may take to send its first byte.
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(5);
/// Quiet period that ends a request the client never completed.
const IDLE_TIMEOUT: Duration = Duration::from_millis(250);

/// Serve the socket transport at `path` until `shutdown` flips to true.
/// The socket file is owner-only and is removed again on exit.
pub async fn run_socket<H: Host>(
    path: &Path,
    router: BridgeRouter<H>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path).map_err(|source| BridgeError::Bind {
        addr: path.display().to_string(),
        source,
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    tracing::info!(path = %path.display(), "bridge socket listener started");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let router = router.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, router).await {
                            tracing::debug!("socket client dropped: {}", e);
                        }
                    });
                }
                Err(e) => tracing::warn!("socket accept failed: {}", e),
            },
            _ = shutdown.wait_for(|&stop| stop) => break,
        }
    }

    drop(listener);
    let _ = std::fs::remove_file(path);
    tracing::info!("bridge socket listener stopped");
    Ok(())
}

async fn handle_connection<H: Host>(mut stream: UnixStream, router: BridgeRouter<H>) -> std::io::Result<()> {
    let raw = read_request(&mut stream).await?;
    if raw.is_empty() {
        return Ok(());
    }
    let resp = match parse_request(&raw) {
        Ok(req) => router.handle(req).await,
        Err(e) => {
            tracing::debug!("unparsable socket request: {}", e);
            Response::text(400, "Bad Request")
        }
    };
    stream.write_all(&encode_response(&resp)).await?;
    stream.shutdown().await
}

/// One request per connection: read until it is complete, the client
/// half-closes, goes quiet, or the size cap is hit.
async fn read_request(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let wait = if raw.is_empty() { FIRST_BYTE_TIMEOUT } else { IDLE_TIMEOUT };
        let n = match tokio::time::timeout(wait, stream.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
        if raw.len() >= MAX_REQUEST_BYTES || request_complete(&raw) {
            break;
        }
    }
    raw.truncate(MAX_REQUEST_BYTES);
    Ok(raw)
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use session::SessionId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::channels::{GatewayEvent, GatewayLinks, RouterCommand, WriterRx};
use crate::telnet::{to_wire, LineBuffer};

/// Serve participant connections on `listener` until `shutdown` flips.
pub async fn serve_lines(
    listener: TcpListener,
    links: GatewayLinks,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "line server listening");
    let next_id = Arc::new(AtomicU64::new(1));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let session_id = SessionId(next_id.fetch_add(1, Ordering::Relaxed));
                tracing::info!(%session_id, %peer, "connection opened");
                if links.events.send(GatewayEvent::Opened { session_id, peer }).is_err() {
                    tracing::warn!("logic thread gone, refusing connection");
                    continue;
                }
                tokio::spawn(handle_session(stream, session_id, links.clone()));
            }
            _ = shutdown.wait_for(|&stop| stop) => break,
        }
    }

    tracing::info!("line server stopped");
    Ok(())
}

async fn handle_session(stream: TcpStream, session_id: SessionId, links: GatewayLinks) {
    let (mut reader, mut writer) = stream.into_split();
    let (writer_tx, mut writer_rx): (_, WriterRx) = mpsc::unbounded_channel();
    let _ = links.router.send(RouterCommand::Attach {
        session_id,
        writer: writer_tx,
    });

    // Ends when the router drops our sender, which is how kicks close the
    // connection after the final text.
    let mut write_half = tokio::spawn(async move {
        while let Some(text) = writer_rx.recv().await {
            if writer.write_all(to_wire(&text).as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for line in lines.feed(&buf[..n]) {
                        let _ = links.events.send(GatewayEvent::Line { session_id, line });
                    }
                }
            },
            _ = &mut write_half => break,
        }
    }

    let _ = links.events.send(GatewayEvent::Closed { session_id });
    let _ = links.router.send(RouterCommand::Detach(session_id));
    write_half.abort();
    tracing::info!(%session_id, "connection closed");
}

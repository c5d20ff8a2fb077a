use std::collections::HashMap;

use session::SessionId;

use crate::channels::{OutputRx, RouterCommand, RouterRx, WriterTx};

/// Fan logic-thread output out to per-connection writers.
///
/// A [`session::SessionOutput`] with `disconnect` set delivers its text and
/// then drops the writer, which makes the connection close once the text is
/// flushed. Returns when both inputs are closed.
pub async fn run_output_router(mut output_rx: OutputRx, mut router_rx: RouterRx) {
    let mut writers: HashMap<SessionId, WriterTx> = HashMap::new();

    loop {
        tokio::select! {
            Some(command) = router_rx.recv() => match command {
                RouterCommand::Attach { session_id, writer } => {
                    tracing::debug!(%session_id, "writer attached");
                    writers.insert(session_id, writer);
                }
                RouterCommand::Detach(session_id) => {
                    tracing::debug!(%session_id, "writer detached");
                    writers.remove(&session_id);
                }
            },
            Some(output) = output_rx.recv() => {
                let Some(writer) = writers.get(&output.session_id) else {
                    tracing::trace!(session_id = %output.session_id, "output for unknown session dropped");
                    continue;
                };
                let delivered = output.text.is_empty() || writer.send(output.text).is_ok();
                if !delivered || output.disconnect {
                    writers.remove(&output.session_id);
                }
            }
            else => break,
        }
    }

    tracing::info!("output router stopped");
}

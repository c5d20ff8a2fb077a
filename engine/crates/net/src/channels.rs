use std::net::SocketAddr;

use session::{SessionId, SessionOutput};
use tokio::sync::mpsc;

/// What the line gateway reports to the logic thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Opened { session_id: SessionId, peer: SocketAddr },
    Line { session_id: SessionId, line: String },
    Closed { session_id: SessionId },
}

impl GatewayEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            GatewayEvent::Opened { session_id, .. }
            | GatewayEvent::Line { session_id, .. }
            | GatewayEvent::Closed { session_id } => *session_id,
        }
    }
}

pub type EventTx = mpsc::UnboundedSender<GatewayEvent>;
pub type EventRx = mpsc::UnboundedReceiver<GatewayEvent>;

/// Logic thread -> output router.
pub type OutputTx = mpsc::UnboundedSender<SessionOutput>;
pub type OutputRx = mpsc::UnboundedReceiver<SessionOutput>;

/// Output router -> one connection's writer task.
pub type WriterTx = mpsc::UnboundedSender<String>;
pub type WriterRx = mpsc::UnboundedReceiver<String>;

/// Writer bookkeeping for the output router.
#[derive(Debug)]
pub enum RouterCommand {
    Attach { session_id: SessionId, writer: WriterTx },
    Detach(SessionId),
}

pub type RouterTx = mpsc::UnboundedSender<RouterCommand>;
pub type RouterRx = mpsc::UnboundedReceiver<RouterCommand>;

/// Sender halves a line server needs.
#[derive(Debug, Clone)]
pub struct GatewayLinks {
    pub events: EventTx,
    pub router: RouterTx,
}

/// Receiver halves, one for the logic thread and two for the output router.
#[derive(Debug)]
pub struct GatewayEnds {
    pub events: EventRx,
    pub output: OutputRx,
    pub router: RouterRx,
}

/// Create every channel the gateway uses. The returned [`OutputTx`] belongs
/// to whoever writes to participants.
pub fn gateway_channels() -> (GatewayLinks, OutputTx, GatewayEnds) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (router_tx, router_rx) = mpsc::unbounded_channel();
    (
        GatewayLinks {
            events: events_tx,
            router: router_tx,
        },
        output_tx,
        GatewayEnds {
            events: events_rx,
            output: output_rx,
            router: router_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (links, _output, mut ends) = gateway_channels();
        let sid = SessionId(7);
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        links
            .events
            .send(GatewayEvent::Opened { session_id: sid, peer })
            .unwrap();
        links
            .events
            .send(GatewayEvent::Line {
                session_id: sid,
                line: "alice".into(),
            })
            .unwrap();
        links.events.send(GatewayEvent::Closed { session_id: sid }).unwrap();

        let first = ends.events.recv().await.unwrap();
        assert!(matches!(first, GatewayEvent::Opened { .. }));
        assert_eq!(
            ends.events.recv().await.unwrap(),
            GatewayEvent::Line {
                session_id: sid,
                line: "alice".into()
            }
        );
        let last = ends.events.recv().await.unwrap();
        assert_eq!(last.session_id(), sid);
        assert!(matches!(last, GatewayEvent::Closed { .. }));
    }
}

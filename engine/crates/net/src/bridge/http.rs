use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use control::Host;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::router::{BridgeRouter, Request, Response};
use super::BridgeError;

/// Every path goes through the fallback so the route table lives in one
/// place, shared with the socket transport.
pub fn app<H: Host>(router: BridgeRouter<H>) -> Router {
    Router::new()
        .fallback(dispatch::<H>)
        .with_state(router)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch<H: Host>(
    State(router): State<BridgeRouter<H>>,
    method: Method,
    uri: Uri,
    body: String,
) -> axum::response::Response {
    let resp = router
        .handle(Request::new(method.as_str(), uri.path(), body))
        .await;
    into_http(resp)
}

fn into_http(resp: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, resp.content_type.mime())],
        resp.body,
    )
        .into_response()
}

pub async fn run_http<H: Host>(
    addr: &str,
    router: BridgeRouter<H>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| BridgeError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    serve_http(listener, router, shutdown).await
}

/// Serve until `shutdown` flips to true, then finish in-flight requests.
pub async fn serve_http<H: Host>(
    listener: TcpListener,
    router: BridgeRouter<H>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    tracing::info!(addr = %listener.local_addr()?, "bridge HTTP listener started");
    axum::serve(listener, app(router))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&stop| stop).await;
        })
        .await?;
    tracing::info!("bridge HTTP listener stopped");
    Ok(())
}

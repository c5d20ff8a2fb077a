//! Kept in its own test binary: log capture needs the process-wide
//! subscriber, and nothing else may log into the capture window.

mod common;

use common::{http, json, start, Client};
use observability::LogCapture;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_output_arrives_through_the_logger() {
    let capture = LogCapture::new();
    tracing_subscriber::registry()
        .with(capture.layer())
        .try_init()
        .unwrap();

    let run = start(capture.clone()).await;
    let mut alice = Client::join(run.line, "alice").await;
    alice.expect("Welcome back to the server!").await;

    let (status, body) = http(run.http, "POST", "/runCommand", Some(r#"{"command":"list"}"#)).await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "");
    let logger = body["logger"].as_str().unwrap();
    assert!(
        logger
            .lines()
            .any(|line| line == "There are 1 participants online: alice"),
        "logger was {logger:?}"
    );
    assert_eq!(capture.active_count(), 0);

    let (_, body) = http(run.http, "POST", "/runCommand", Some(r#"{"command":"say hi all"}"#)).await;
    let body = json(&body);
    assert_eq!(body["success"], true);
    assert!(body["logger"].as_str().unwrap().contains("[broadcast] [Server] hi all"));
    alice.expect("[Server] hi all").await;

    run.shutdown.trigger();
    run.task.await.unwrap().unwrap();
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use authority::mock::MockAuthority;
use net::ansi::strip_ansi;
use observability::{LogCapture, LogRing};
use project_connector::shutdown::{shutdown_channel, ShutdownTx};
use project_connector::{AppError, Connector, ServerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UnixStream};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Running {
    pub http: SocketAddr,
    pub line: SocketAddr,
    pub socket: PathBuf,
    pub auth: Arc<MockAuthority>,
    pub logs: LogRing,
    pub shutdown: ShutdownTx,
    pub task: JoinHandle<Result<(), AppError>>,
    _dir: TempDir,
}

pub async fn start(capture: LogCapture) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("connector.sock");

    let mut config = ServerConfig::default();
    config.authority.api_url = "http://authority.invalid".into();
    config.tick.tps = 50;
    config.bridge.http_addr = "127.0.0.1:0".into();
    config.bridge.socket_path = socket.to_string_lossy().into_owned();
    config.host.participant_addr = "127.0.0.1:0".into();
    config.host.extensions = vec!["connector".into()];
    config.validate().unwrap();

    let auth = Arc::new(MockAuthority::new());
    let logs = LogRing::in_memory(100);
    let connector = Connector::bind(config, auth.clone(), logs.clone(), capture)
        .await
        .unwrap();
    let http = connector.http_addr().unwrap();
    let line = connector.line_addr().unwrap();

    let (shutdown, _rx) = shutdown_channel();
    let task = tokio::spawn(connector.run(shutdown.clone()));

    let deadline = tokio::time::Instant::now() + WAIT;
    while !socket.exists() {
        assert!(tokio::time::Instant::now() < deadline, "socket never appeared");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        http,
        line,
        socket,
        auth,
        logs,
        shutdown,
        task,
        _dir: dir,
    }
}

/// One HTTP/1.1 exchange over a raw TCP stream. Returns status and body.
pub async fn http(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    (status, body.to_string())
}

/// One framed exchange over the Unix socket. Returns status and body.
pub async fn socket(path: &PathBuf, request: &str) -> (u16, String) {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let (status, body) = raw.split_once('\n').unwrap();
    (status.parse().unwrap(), body.to_string())
}

pub fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

/// A participant on the line gateway.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Connect and give `name` at the prompt.
    pub async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect("Enter your name:").await;
        client.send(name).await;
        client.expect(&format!("Hello, {name}!")).await;
        client
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next line without colors, or `None` at end of stream.
    pub async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        (n > 0).then(|| strip_ansi(line.trim_end()))
    }

    /// Skip lines until one equals `text`.
    pub async fn expect(&mut self, text: &str) {
        loop {
            match self.next_line().await {
                Some(line) if line == text => return,
                Some(_) => continue,
                None => panic!("connection closed before {text:?}"),
            }
        }
    }

    pub async fn expect_closed(&mut self) {
        while self.next_line().await.is_some() {}
    }
}

/// Poll `check` until it holds or [`WAIT`] runs out.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

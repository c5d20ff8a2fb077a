use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use authority::Authority;
use control::{ControlPlane, COMMAND_LOG_GRACE_TICKS};
use engine_core::{task_queue, TickLoop};
use net::bridge::{http, unix};
use net::{gateway_channels, run_output_router, serve_lines, BridgeRouter};
use observability::{LogCapture, LogRing};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::host::{HostOptions, TelnetHost};
use crate::shutdown::ShutdownTx;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("logic thread panicked")]
    LogicThread,
}

/// A connector with its TCP listeners bound, ready to run.
pub struct Connector {
    config: ServerConfig,
    authority: Arc<dyn Authority>,
    logs: LogRing,
    capture: LogCapture,
    line_listener: TcpListener,
    http_listener: Option<TcpListener>,
}

async fn bind(what: &'static str, addr: &str) -> Result<TcpListener, AppError> {
    TcpListener::bind(addr).await.map_err(|source| AppError::Bind {
        what,
        addr: addr.to_string(),
        source,
    })
}

impl Connector {
    pub async fn bind(
        config: ServerConfig,
        authority: Arc<dyn Authority>,
        logs: LogRing,
        capture: LogCapture,
    ) -> Result<Self, AppError> {
        let line_listener = bind("participant gateway", &config.host.participant_addr).await?;
        let http_listener = if config.bridge.enable_http {
            Some(bind("bridge HTTP", &config.bridge.http_addr).await?)
        } else {
            None
        };
        Ok(Self {
            config,
            authority,
            logs,
            capture,
            line_listener,
            http_listener,
        })
    }

    pub fn line_addr(&self) -> std::io::Result<SocketAddr> {
        self.line_listener.local_addr()
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Run until the host terminates or `shutdown` is triggered. The
    /// logic thread triggers `shutdown` itself when the host stops, so the
    /// listeners always wind down together.
    pub async fn run(self, shutdown: ShutdownTx) -> Result<(), AppError> {
        let Connector {
            config,
            authority,
            logs,
            capture,
            line_listener,
            http_listener,
        } = self;

        let (links, output, ends) = gateway_channels();
        let mut listeners = Vec::new();
        tokio::spawn(run_output_router(ends.output, ends.router));
        listeners.push(supervise(
            "participant gateway",
            serve_lines(line_listener, links, shutdown.subscribe().watch()),
            shutdown.clone(),
        ));

        let host = TelnetHost::new(
            ends.events,
            output,
            HostOptions {
                server_port: config.server_port(),
                operators: config.host.operators.clone(),
                extensions: config.host.extensions.clone(),
            },
        );
        let (tasks, queue) = task_queue();
        let plane = ControlPlane::new(
            host,
            authority,
            tasks.clone(),
            tokio::runtime::Handle::current(),
            capture,
            config.to_control_settings(),
        );

        let router = BridgeRouter::new(tasks, logs, config.shutdown.default_delay_ticks);
        if let Some(listener) = http_listener {
            listeners.push(supervise(
                "bridge HTTP",
                http::serve_http(listener, router.clone(), shutdown.subscribe().watch()),
                shutdown.clone(),
            ));
        }
        if config.bridge.enable_socket {
            let path = PathBuf::from(&config.bridge.socket_path);
            let (router, stop) = (router.clone(), shutdown.subscribe().watch());
            listeners.push(supervise(
                "bridge socket",
                async move { unix::run_socket(&path, router, stop).await },
                shutdown.clone(),
            ));
        }

        let tick_config = config.to_tick_config();
        let stop = shutdown.subscribe();
        let trigger = shutdown.clone();
        let logic = std::thread::Builder::new()
            .name("logic".into())
            .spawn(move || {
                let mut tick = TickLoop::new(tick_config, plane, queue);
                tracing::info!(tps = tick.config.tps, "logic thread started");
                // A command that stopped the host still owes its reply.
                let mut drain = COMMAND_LOG_GRACE_TICKS + 1;
                let ticks = tick.run_while(|plane| {
                    plane.pump();
                    if plane.is_terminated() || plane.host.is_stopped() || stop.is_shutdown() {
                        drain = drain.saturating_sub(1);
                    }
                    drain > 0
                });
                tick.ctx.cleanup_all();
                control::Host::shutdown(&mut tick.ctx.host);
                tracing::info!(ticks, "logic thread stopped");
                trigger.trigger();
            })?;

        shutdown.subscribe().wait().await;
        tokio::task::spawn_blocking(move || logic.join())
            .await
            .map_err(|_| AppError::LogicThread)?
            .map_err(|_| AppError::LogicThread)?;

        for listener in listeners {
            let _ = listener.await;
        }
        Ok(())
    }
}

/// Run a listener; if it fails, log and bring the whole connector down.
fn supervise<E>(
    what: &'static str,
    listener: impl Future<Output = Result<(), E>> + Send + 'static,
    shutdown: ShutdownTx,
) -> JoinHandle<()>
where
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = listener.await {
            tracing::error!(listener = what, "listener failed: {}", e);
            shutdown.trigger();
        }
    })
}

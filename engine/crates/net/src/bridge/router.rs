use control::{ControlPlane, Host};
use engine_core::{Scheduler, SchedulerError};
use observability::LogRing;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use session::ParticipantId;

/// A transport-neutral control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Json,
}

impl ContentType {
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Text => "text/plain; charset=utf-8",
            ContentType::Json => "application/json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: ContentType,
    pub body: String,
}

impl Response {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: ContentType::Text,
            body: body.into(),
        }
    }

    pub fn json(value: &impl Serialize) -> Result<Self, RouteError> {
        Ok(Self {
            status: 200,
            content_type: ContentType::Json,
            body: serde_json::to_string(value)?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("logic thread: {0}")]
    Logic(#[from] SchedulerError),

    #[error("encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RouteError {
    pub fn status(&self) -> u16 {
        match self {
            RouteError::NotFound => 404,
            RouteError::BadRequest(_) => 400,
            RouteError::Logic(_) | RouteError::Encode(_) => 500,
        }
    }

    fn missing(field: &str) -> Self {
        RouteError::BadRequest(format!("Bad Request, Missing {field}"))
    }
}

impl From<RouteError> for Response {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound | RouteError::BadRequest(_) => Response::text(err.status(), err.to_string()),
            RouteError::Logic(_) | RouteError::Encode(_) => Response::text(500, "Internal error"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RunCommandBody {
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ShutdownBody {
    tick: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    player_name: Option<String>,
    otp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegisteredBody {
    uuid: Option<String>,
}

#[derive(Debug, Serialize)]
struct Success {
    success: bool,
}

#[derive(Debug, Serialize)]
struct Registration {
    success: bool,
    uuid: ParticipantId,
}

#[derive(Debug, Serialize)]
struct ShuttingDown {
    result: bool,
}

#[derive(Debug, Serialize)]
struct PlayerView {
    uuid: ParticipantId,
    name: String,
}

#[derive(Debug, Serialize)]
struct Plugins {
    plugins: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LogView {
    timestamp: String,
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Maps control requests onto logic-thread operations. Shared by every
/// bridge transport.
pub struct BridgeRouter<H: Host> {
    tasks: Scheduler<ControlPlane<H>>,
    logs: LogRing,
    default_delay: i64,
}

impl<H: Host> Clone for BridgeRouter<H> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            logs: self.logs.clone(),
            default_delay: self.default_delay,
        }
    }
}

impl<H: Host> BridgeRouter<H> {
    pub fn new(tasks: Scheduler<ControlPlane<H>>, logs: LogRing, default_delay_ticks: u64) -> Self {
        Self {
            tasks,
            logs,
            default_delay: i64::try_from(default_delay_ticks).unwrap_or(i64::MAX),
        }
    }

    pub fn scheduler(&self) -> &Scheduler<ControlPlane<H>> {
        &self.tasks
    }

    /// Route one request. Never fails; errors become 4xx/5xx responses.
    pub async fn handle(&self, req: Request) -> Response {
        match self.route(&req).await {
            Ok(resp) => resp,
            Err(err) => {
                if err.status() >= 500 {
                    tracing::error!(method = %req.method, path = %req.path, "bridge request failed: {}", err);
                } else {
                    tracing::debug!(method = %req.method, path = %req.path, status = err.status(), "bridge request rejected");
                }
                err.into()
            }
        }
    }

    async fn route(&self, req: &Request) -> Result<Response, RouteError> {
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/runCommand") => {
                let body: RunCommandBody = parse_body(&req.body)?;
                let command = body.command.ok_or_else(|| RouteError::missing("command"))?;
                let result = self
                    .tasks
                    .call_with(move |plane, reply| plane.run_command(command, reply))
                    .await?;
                Response::json(&result)
            }
            ("POST", "/shutdown") => {
                let body: ShutdownBody = parse_body(&req.body)?;
                let tick = body.tick.ok_or_else(|| RouteError::missing("tick"))?;
                self.schedule(tick).await
            }
            ("GET", "/shutdown") => self.schedule(self.default_delay).await,
            ("GET", "/cancelShutdown") => {
                let success = self.tasks.call(|plane| plane.cancel_shutdown()).await?;
                Response::json(&Success { success })
            }
            ("GET", "/shuttingDown") => {
                let result = self.tasks.call(|plane| plane.has_scheduled_shutdown()).await?;
                Response::json(&ShuttingDown { result })
            }
            ("GET", "/logs") => {
                let entries: Vec<LogView> = self
                    .logs
                    .recent()
                    .into_iter()
                    .map(|entry| LogView {
                        timestamp: entry.timestamp,
                        message: entry.message,
                        kind: "server",
                    })
                    .collect();
                Response::json(&entries)
            }
            ("GET", "/players") => {
                let players = self
                    .tasks
                    .call(|plane| {
                        plane
                            .host
                            .participants()
                            .into_iter()
                            .map(|p| PlayerView { uuid: p.id, name: p.name })
                            .collect::<Vec<_>>()
                    })
                    .await?;
                Response::json(&players)
            }
            ("GET", "/ping") => Ok(Response::text(200, "Pong!")),
            ("GET", "/plugins") => {
                let plugins = self.tasks.call(|plane| plane.host.extensions()).await?;
                Response::json(&Plugins { plugins })
            }
            ("POST", "/register") => {
                let body: RegisterBody = parse_body(&req.body)?;
                let name = body.player_name.ok_or_else(|| RouteError::missing("playerName"))?;
                let otp = body.otp.ok_or_else(|| RouteError::missing("otp"))?;
                let delivered = self
                    .tasks
                    .call(move |plane| plane.deliver_otp(&name, &otp))
                    .await?;
                match delivered {
                    Some(uuid) => Response::json(&Registration { success: true, uuid }),
                    None => Err(RouteError::BadRequest("Player not found".into())),
                }
            }
            ("POST", "/registered") => {
                let body: RegisteredBody = parse_body(&req.body)?;
                let raw = body.uuid.ok_or_else(|| RouteError::missing("uuid"))?;
                let id: ParticipantId = raw
                    .parse()
                    .map_err(|_| RouteError::BadRequest("Bad Request, Invalid uuid".into()))?;
                if self.tasks.call(move |plane| plane.mark_registered(id)).await? {
                    Ok(Response::text(200, "Ok"))
                } else {
                    Err(RouteError::BadRequest("Player not found".into()))
                }
            }
            _ => Err(RouteError::NotFound),
        }
    }

    async fn schedule(&self, delay: i64) -> Result<Response, RouteError> {
        let success = self
            .tasks
            .call(move |plane| plane.schedule_shutdown(delay, false))
            .await?;
        Response::json(&Success { success })
    }
}

/// An empty body reads as `{}`.
fn parse_body<T: DeserializeOwned + Default>(body: &str) -> Result<T, RouteError> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| RouteError::BadRequest(format!("Bad Request, {e}")))
}

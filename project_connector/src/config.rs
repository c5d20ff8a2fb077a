use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use control::ControlSettings;
use engine_core::TickConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickSection {
    pub tps: u32,
}

impl Default for TickSection {
    fn default() -> Self {
        Self { tps: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub http_addr: String,
    pub socket_path: String,
    pub enable_http: bool,
    pub enable_socket: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:6001".to_string(),
            socket_path: "data/connector.sock".to_string(),
            enable_http: true,
            enable_socket: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthoritySection {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for AuthoritySection {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub period_ticks: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            period_ticks: 36_000, // 30 minutes at 20 TPS
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownSection {
    pub default_delay_ticks: u64,
    pub grace_ticks: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            default_delay_ticks: 1_200,
            grace_ticks: 1_200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    pub capacity: usize,
    pub file: String,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            capacity: observability::DEFAULT_LOG_CAPACITY,
            file: "data/log.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub participant_addr: String,
    /// Port reported to the authority; the participant port when unset.
    pub server_port: Option<u16>,
    pub operators: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            participant_addr: "0.0.0.0:4000".to_string(),
            server_port: None,
            operators: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick: TickSection,
    pub bridge: BridgeSection,
    pub authority: AuthoritySection,
    pub monitor: MonitorSection,
    pub shutdown: ShutdownSection,
    pub logs: LogsSection,
    pub host: HostSection,
}

impl ServerConfig {
    /// Load configuration from an optional TOML file path. A missing file
    /// means defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        Ok(config)
    }

    /// Reject configurations the connector cannot start with.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.authority.api_url.trim().is_empty() {
            return Err("authority.api_url is not set (config file or --api-url)".into());
        }
        if !self.bridge.enable_http && !self.bridge.enable_socket {
            tracing::warn!("both bridge transports are disabled");
        }
        Ok(())
    }

    pub fn to_tick_config(&self) -> TickConfig {
        TickConfig {
            tps: self.tick.tps,
            max_ticks: 0,
        }
    }

    pub fn to_control_settings(&self) -> ControlSettings {
        ControlSettings {
            monitor_period_ticks: self.monitor.period_ticks,
            default_shutdown_delay: self.shutdown.default_delay_ticks,
            grace_ticks: self.shutdown.grace_ticks,
        }
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_secs(self.authority.timeout_secs)
    }

    /// Port sent to the authority with every call.
    pub fn server_port(&self) -> u16 {
        self.host.server_port.unwrap_or_else(|| {
            self.host
                .participant_addr
                .rsplit(':')
                .next()
                .and_then(|port| port.parse().ok())
                .unwrap_or(0)
        })
    }
}

/// Command-line flags of `connector_server`.
#[derive(Debug, Parser)]
#[command(name = "connector_server", about = "Control-plane connector for a tick-driven host")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<String>,

    /// Authority base URL, overriding `authority.api_url`.
    #[arg(long)]
    pub api_url: Option<String>,
}

impl Cli {
    /// Load the file configuration and apply flag overrides.
    pub fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = ServerConfig::load(self.config.as_deref())?;
        if let Some(url) = self.api_url {
            config.authority.api_url = url;
        }
        config.validate()?;
        Ok(config)
    }
}

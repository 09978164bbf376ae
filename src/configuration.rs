use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_host: String,
    pub app_port: u16,
    /// Name reported to clients in the `initialize` handshake.
    pub server_name: String,
    pub mcp: McpSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Path of the side channel that accepts inbound posts.
    pub messages_path: String,
    pub inbound_buffer: usize,
    pub outbound_buffer: usize,
    /// Interval between keep-alive comments on an idle event stream.
    pub keep_alive_secs: u64,
    pub tool_timeout_secs: u64,
    /// Requests of one session that may run concurrently.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_host: "127.0.0.1".to_string(),
            app_port: 8000,
            server_name: "toolbridge".to_string(),
            mcp: McpSettings::default(),
            fetch: FetchSettings::default(),
        }
    }
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            messages_path: "/messages/".to_string(),
            inbound_buffer: 64,
            outbound_buffer: 64,
            keep_alive_secs: 15,
            tool_timeout_secs: 30,
            max_in_flight: 32,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_bytes: 1024 * 1024,
            user_agent: concat!("toolbridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }
}

impl McpSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    /// `None` when `tool_timeout_secs` is zero.
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // `configuration.yaml` is optional, every key has a default.
    // Environment overrides look like APP_APP_PORT=9000 or APP_MCP__TOOL_TIMEOUT_SECS=5
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}

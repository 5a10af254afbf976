use std::time::Duration;

use serde::Deserialize;

use crate::client::DEFAULT_ADDRESS;
use crate::stomp::{ConnectOptions, Heartbeat};

/// Top-level configuration for both the test client and the loopback broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub session: SessionSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Where the test client connects and how it keeps the connection alive.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_incoming_ms: u32,
    pub heartbeat_outgoing_ms: u32,
    pub connect_timeout_ms: u64,
}

impl ClientSettings {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            heartbeat: Heartbeat::new(self.heartbeat_outgoing_ms, self.heartbeat_incoming_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// The scripted session run by the `client` subcommand.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub channel_id: u64,
    pub message: String,
    pub interval_ms: u64,
    pub duration_secs: u64,
}

/// Bind address and endpoint of the loopback broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration as found in files or the environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub session: Option<PartialSessionSettings>,
    pub server: Option<PartialServerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_incoming_ms: Option<u32>,
    pub heartbeat_outgoing_ms: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialSessionSettings {
    pub channel_id: Option<u64>,
    pub message: Option<String>,
    pub interval_ms: Option<u64>,
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay the values present here on top of `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        Settings {
            client: self.client.unwrap_or_default().merge(defaults.client),
            session: self.session.unwrap_or_default().merge(defaults.session),
            server: self.server.unwrap_or_default().merge(defaults.server),
            logging: self.logging.unwrap_or_default().merge(defaults.logging),
        }
    }
}

impl PartialClientSettings {
    fn merge(self, defaults: ClientSettings) -> ClientSettings {
        ClientSettings {
            url: self.url.unwrap_or(defaults.url),
            reconnect_delay_ms: self.reconnect_delay_ms.unwrap_or(defaults.reconnect_delay_ms),
            heartbeat_incoming_ms: self
                .heartbeat_incoming_ms
                .unwrap_or(defaults.heartbeat_incoming_ms),
            heartbeat_outgoing_ms: self
                .heartbeat_outgoing_ms
                .unwrap_or(defaults.heartbeat_outgoing_ms),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
        }
    }
}

impl PartialSessionSettings {
    fn merge(self, defaults: SessionSettings) -> SessionSettings {
        SessionSettings {
            channel_id: self.channel_id.unwrap_or(defaults.channel_id),
            message: self.message.unwrap_or(defaults.message),
            interval_ms: self.interval_ms.unwrap_or(defaults.interval_ms),
            duration_secs: self.duration_secs.unwrap_or(defaults.duration_secs),
        }
    }
}

impl PartialServerSettings {
    fn merge(self, defaults: ServerSettings) -> ServerSettings {
        ServerSettings {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            endpoint: self.endpoint.unwrap_or(defaults.endpoint),
        }
    }
}

impl PartialLoggingSettings {
    fn merge(self, defaults: LoggingSettings) -> LoggingSettings {
        LoggingSettings {
            level: self.level.unwrap_or(defaults.level),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                url: DEFAULT_ADDRESS.to_string(),
                reconnect_delay_ms: 5000,
                heartbeat_incoming_ms: 4000,
                heartbeat_outgoing_ms: 4000,
                connect_timeout_ms: 5000,
            },
            session: SessionSettings {
                channel_id: 1,
                message: "Hello from automated test!".to_string(),
                interval_ms: 5000,
                duration_secs: 60,
            },
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                endpoint: "/ws/chat".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use crate::error::ConfigError;

/// Signaling relay between browsers and a Kurento media server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address the WebSocket signaling endpoint listens on
    #[arg(long, default_value = "127.0.0.1:8443", env = "RELAY_LISTEN")]
    pub listen: SocketAddr,

    /// Kurento media server JSON-RPC endpoint
    #[arg(
        long,
        default_value = "ws://localhost:8888/kurento",
        env = "RELAY_MEDIA_SERVER_URI"
    )]
    pub media_server_uri: String,

    /// Path segment browsers connect to
    #[arg(long, default_value = "helloworld", env = "RELAY_WS_PATH")]
    pub ws_path: String,

    /// Upper bound for each media server call, in seconds
    #[arg(long, default_value_t = 10, env = "RELAY_PROVISION_TIMEOUT_SECS")]
    pub provision_timeout_secs: u64,

    /// Interval between keepalive pings to the media server, in seconds
    #[arg(long, default_value_t = 240, env = "RELAY_KEEPALIVE_SECS")]
    pub keepalive_secs: u64,

    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    pub log_level: LevelFilter,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_path.is_empty() || self.ws_path.contains('/') {
            return Err(ConfigError::InvalidPath(self.ws_path.clone()));
        }
        if self.provision_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("provision timeout"));
        }
        if self.keepalive_secs == 0 {
            return Err(ConfigError::ZeroDuration("keepalive interval"));
        }
        Ok(())
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

//! Session configuration.

use std::time::Duration;

/// Which client the session impersonates; this decides the transport and
/// a handful of protocol details (patch read-back, payload fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    /// WebSocket transport, web multi-device behavior.
    Web,
    /// Raw TCP transport, primary-device behavior.
    Mobile,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub profile: ClientProfile,
    /// WebSocket chat endpoint.
    pub web_endpoint: String,
    /// `Origin` header value the server requires.
    pub web_origin: String,
    /// `Host` header value the server requires.
    pub web_host: String,
    /// `host:port` for the raw-socket profile.
    pub mobile_endpoint: String,
    /// Optional HTTP proxy (`host:port`) for the web profile.
    pub proxy: Option<String>,
    pub handshake_timeout: Duration,
    pub iq_timeout: Duration,
    pub sync_pull_timeout: Duration,
    pub pairing_timeout: Duration,
    pub history_idle_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: ClientProfile::Web,
            web_endpoint: "wss://web.whatsapp.com/ws/chat".to_string(),
            web_origin: "https://web.whatsapp.com".to_string(),
            web_host: "web.whatsapp.com".to_string(),
            mobile_endpoint: "g.whatsapp.net:443".to_string(),
            proxy: None,
            handshake_timeout: Duration::from_secs(30),
            iq_timeout: Duration::from_secs(60),
            sync_pull_timeout: Duration::from_secs(120),
            pairing_timeout: Duration::from_secs(30),
            history_idle_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(24),
        }
    }
}

impl Config {
    pub fn mobile() -> Self {
        Self {
            profile: ClientProfile::Mobile,
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let config = Config::default();
        assert_eq!(config.profile, ClientProfile::Web);
        assert!(config.web_endpoint.starts_with("wss://"));
        assert_eq!(config.iq_timeout, Duration::from_secs(60));
        assert_eq!(config.sync_pull_timeout, Duration::from_secs(120));
        assert_eq!(config.history_idle_timeout, Duration::from_secs(10));
    }
}

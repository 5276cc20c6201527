//! Session configuration.

use std::time::Duration;

use url::{Url, form_urlencoded};

use crate::error::{TransportError, TransportResult};

/// Transport-level ping/pong heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often a ping frame is sent.
    pub interval: Duration,
    /// How long to wait for the matching pong.
    pub pong_timeout: Duration,
    /// Consecutive missed pongs before the connection is dropped (0 = never).
    pub disconnect_timeout_count: u8,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(3),
            disconnect_timeout_count: 2,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("Heartbeat interval must be > 0".to_string());
        }
        if self.pong_timeout.is_zero() {
            return Err("Pong timeout must be > 0".to_string());
        }
        if self.pong_timeout >= self.interval {
            return Err("Pong timeout must be shorter than the heartbeat interval".to_string());
        }
        Ok(())
    }
}

/// Configuration for one device-to-cloud session.
///
/// Immutable once handed to a session.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    // Target
    pub host: String,
    pub port: u16,
    /// Request target, path plus query.
    pub path: String,
    /// Appended to `path` as the `apiKey` query parameter.
    pub api_key: Option<String>,

    // Upgrade request headers
    /// Sent verbatim as `Authorization: <token>`.
    pub token: Option<String>,
    /// Sent as `Authorization: Basic base64(user:pass)`.
    pub basic_auth: Option<(String, String)>,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub extensions: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub user_agent: String,

    // Timing
    /// Socket connect timeout; also bounds the wait for the upgrade response.
    pub connect_timeout: Duration,
    /// Fixed delay after a failure before the next connection attempt.
    pub reconnect_interval: Duration,
    /// Period of the application-level `ping` task.
    pub heartbeat_interval: Duration,
    /// Optional transport ping/pong heartbeat.
    pub transport_heartbeat: Option<HeartbeatConfig>,

    // Limits
    /// Largest accepted frame or reassembled message.
    pub max_payload_size: usize,
    /// Soft cap on the replay buffer.
    pub max_buffered_messages: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            path: "/?type=device".to_string(),
            api_key: None,
            token: None,
            basic_auth: None,
            origin: Some("file://".to_string()),
            protocol: None,
            extensions: None,
            extra_headers: Vec::new(),
            user_agent: "duplex-client".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(25),
            transport_heartbeat: None,
            max_payload_size: 1024 * 1024,
            max_buffered_messages: 256,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration targeting `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Derive host, port and request target from a `ws://` or `wss://` URL.
    ///
    /// TLS is the socket's concern; the scheme only picks the default port.
    pub fn from_url(url: &str) -> TransportResult<Self> {
        let url = Url::parse(url)?;
        let default_port = match url.scheme() {
            "ws" => 80,
            "wss" => 443,
            other => {
                return Err(TransportError::config(format!(
                    "Unsupported URL scheme: {other}"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::config("URL has no host"))?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new(host, url.port().unwrap_or(default_port)).path(path))
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Set the `Origin` header; `None` omits it.
    #[must_use]
    pub fn origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    #[must_use]
    pub fn extensions(mut self, extensions: impl Into<String>) -> Self {
        self.extensions = Some(extensions.into());
        self
    }

    /// Add one extra request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn transport_heartbeat(mut self, heartbeat: Option<HeartbeatConfig>) -> Self {
        self.transport_heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    #[must_use]
    pub fn max_buffered_messages(mut self, max: usize) -> Self {
        self.max_buffered_messages = max;
        self
    }

    /// The request target sent in the upgrade request line, with the API key
    /// appended when one is configured.
    pub fn request_path(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let separator = match self.path.split_once('?') {
                    Some((_, "")) => "",
                    Some(_) => "&",
                    None => "?",
                };
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("apiKey", key)
                    .finish();
                format!("{}{separator}{query}", self.path)
            }
            None => self.path.clone(),
        }
    }

    /// Headers added to the upgrade request after the protocol headers.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.extra_headers.len() + 1);
        if let Some(origin) = &self.origin {
            headers.push(("Origin".to_string(), origin.clone()));
        }
        headers.extend(self.extra_headers.iter().cloned());
        headers
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("Port must be > 0".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("Path must start with '/'".to_string());
        }
        if self.path.contains(|c: char| c.is_ascii_whitespace() || c.is_ascii_control()) {
            return Err("Path must not contain whitespace or control characters".to_string());
        }
        let header_values = [
            self.token.as_deref(),
            self.origin.as_deref(),
            self.protocol.as_deref(),
            self.extensions.as_deref(),
            self.basic_auth.as_ref().map(|(user, _)| user.as_str()),
            Some(self.user_agent.as_str()),
        ];
        if header_values.into_iter().flatten().any(breaks_header_line) {
            return Err("Header values must not contain CR or LF".to_string());
        }
        for (name, value) in &self.extra_headers {
            if name.is_empty() || name.contains(|c: char| c == ':' || c.is_ascii_whitespace()) {
                return Err(format!("Invalid header name {name:?}"));
            }
            if breaks_header_line(value) {
                return Err("Header values must not contain CR or LF".to_string());
            }
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.reconnect_interval.is_zero() {
            return Err("Reconnect interval must be > 0".to_string());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("Heartbeat interval must be > 0".to_string());
        }
        if let Some(heartbeat) = &self.transport_heartbeat {
            heartbeat.validate()?;
        }
        if self.max_payload_size == 0 {
            return Err("Max payload size must be > 0".to_string());
        }
        if self.max_buffered_messages == 0 {
            return Err("Max buffered messages must be > 0".to_string());
        }
        Ok(())
    }
}

fn breaks_header_line(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::new("api.example.com", 443);
        assert_eq!(config.path, "/?type=device");
        assert_eq!(config.origin.as_deref(), Some("file://"));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert!(config.transport_heartbeat.is_none());
        assert_eq!(config.max_payload_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::new("api.example.com", 8080)
            .api_key("key-1")
            .token("tok")
            .protocol("node")
            .header("X-Device", "d1")
            .reconnect_interval(Duration::from_millis(500))
            .transport_heartbeat(Some(HeartbeatConfig::default()));

        assert_eq!(config.api_key.as_deref(), Some("key-1"));
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.protocol.as_deref(), Some("node"));
        assert_eq!(config.reconnect_interval, Duration::from_millis(500));
        assert_eq!(
            config.request_headers(),
            vec![
                ("Origin".to_string(), "file://".to_string()),
                ("X-Device".to_string(), "d1".to_string()),
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_request_path_with_api_key() {
        let config = ConnectionConfig::new("h", 80).api_key("abc");
        assert_eq!(config.request_path(), "/?type=device&apiKey=abc");

        let config = ConnectionConfig::new("h", 80).path("/ws").api_key("abc");
        assert_eq!(config.request_path(), "/ws?apiKey=abc");

        let config = ConnectionConfig::new("h", 80).path("/ws");
        assert_eq!(config.request_path(), "/ws");

        let config = ConnectionConfig::new("h", 80).path("/ws?").api_key("abc");
        assert_eq!(config.request_path(), "/ws?apiKey=abc");
    }

    #[test]
    fn test_api_key_is_query_encoded() {
        let config = ConnectionConfig::new("h", 80).api_key("a b&type=x#\r\n");
        let path = config.request_path();
        assert!(!path.contains(|c: char| c.is_ascii_whitespace() || c == '#'));

        let parsed = Url::parse(&format!("ws://h{path}")).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("type".to_string(), "device".to_string()),
                ("apiKey".to_string(), "a b&type=x#\r\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_header_injection() {
        assert_eq!(
            ConnectionConfig::new("h", 80)
                .token("t\r\nX-Evil: 1")
                .validate()
                .unwrap_err(),
            "Header values must not contain CR or LF"
        );
        assert_eq!(
            ConnectionConfig::new("h", 80)
                .header("X-Device", "d1\nX-Evil: 1")
                .validate()
                .unwrap_err(),
            "Header values must not contain CR or LF"
        );
        assert!(
            ConnectionConfig::new("h", 80)
                .header("Bad Name", "v")
                .validate()
                .is_err()
        );
        assert!(
            ConnectionConfig::new("h", 80)
                .path("/ws HTTP/1.0")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_url() {
        let config = ConnectionConfig::from_url("ws://localhost:9001/?type=device").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9001);
        assert_eq!(config.path, "/?type=device");

        let config = ConnectionConfig::from_url("wss://api.example.com").unwrap();
        assert_eq!(config.port, 443);
        assert_eq!(config.path, "/");

        assert!(matches!(
            ConnectionConfig::from_url("http://example.com"),
            Err(TransportError::Config { .. })
        ));
        assert!(matches!(
            ConnectionConfig::from_url("not a url"),
            Err(TransportError::Url(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            ConnectionConfig::default().validate().unwrap_err(),
            "Host cannot be empty"
        );
        assert_eq!(
            ConnectionConfig::new("h", 0).validate().unwrap_err(),
            "Port must be > 0"
        );
        assert_eq!(
            ConnectionConfig::new("h", 80).path("ws").validate().unwrap_err(),
            "Path must start with '/'"
        );
        assert_eq!(
            ConnectionConfig::new("h", 80)
                .reconnect_interval(Duration::ZERO)
                .validate()
                .unwrap_err(),
            "Reconnect interval must be > 0"
        );
        assert_eq!(
            ConnectionConfig::new("h", 80)
                .max_buffered_messages(0)
                .validate()
                .unwrap_err(),
            "Max buffered messages must be > 0"
        );
    }

    #[test]
    fn test_heartbeat_validation() {
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(2),
            pong_timeout: Duration::from_secs(2),
            disconnect_timeout_count: 1,
        };
        let config = ConnectionConfig::new("h", 80).transport_heartbeat(Some(heartbeat));
        assert_eq!(
            config.validate().unwrap_err(),
            "Pong timeout must be shorter than the heartbeat interval"
        );
    }
}

//! Connection-pooled eAPI client.
//!
//! One client is created per device and reused for every command batch sent
//! to it, so the underlying HTTP connection pool bounds the per-device
//! transport resources independently of how many checks are running.

use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

use crate::request::{EapiRequest, EapiResponse, RawCommand, ResponseFormat, Version};

/// Transport scheme used to reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

/// Connection-pool limits for one device's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientLimits {
    /// Maximum simultaneous connections, for run-information logging.
    pub max_connections: usize,
    /// Idle keep-alive connections retained in the pool.
    pub max_keepalive_connections: usize,
    /// How long an idle keep-alive connection is retained.
    pub keepalive_expiry: Duration,
}

impl Default for ClientLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_keepalive_connections: 20,
            keepalive_expiry: Duration::from_secs(5),
        }
    }
}

/// Per-operation timeouts for one device's client.
///
/// `None` disables the timeout for that operation. The HTTP layer exposes a
/// connect timeout and a total request deadline; `read` and `write` are
/// folded into the deadline (the stricter of the two applies) and `pool`
/// acquisition is bounded by the same deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub pool: Option<Duration>,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        let five = Some(Duration::from_secs(5));
        Self {
            connect: five,
            read: five,
            write: five,
            pool: five,
        }
    }
}

impl ClientTimeouts {
    /// A uniform timeout for every operation.
    pub fn global(timeout: Option<Duration>) -> Self {
        Self {
            connect: timeout,
            read: timeout,
            write: timeout,
            pool: timeout,
        }
    }

    /// The total request deadline: the stricter of the read and write bounds.
    pub fn request_deadline(&self) -> Option<Duration> {
        match (self.read, self.write) {
            (Some(read), Some(write)) => Some(read.min(write)),
            (Some(read), None) => Some(read),
            (None, Some(write)) => Some(write),
            (None, None) => None,
        }
    }
}

/// Configuration for an [`EapiClient`].
#[derive(Debug, Clone)]
pub struct EapiConfig {
    pub host: String,
    /// eAPI port; defaults to 80/443 depending on the protocol.
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub username: String,
    pub password: String,
    pub limits: ClientLimits,
    pub timeouts: ClientTimeouts,
}

impl EapiConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            protocol: Protocol::default(),
            username: username.into(),
            password: password.into(),
            limits: ClientLimits::default(),
            timeouts: ClientTimeouts::default(),
        }
    }
}

/// Errors surfaced by the eAPI client.
///
/// `Command` means the device accepted the connection but rejected a command
/// in the batch; everything else is a transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum EapiError {
    /// The device rejected a command in the batch.
    #[error("device rejected command batch: {message}")]
    Command {
        /// JSON-RPC error message, names the failing command.
        message: String,
        /// Device-reported error strings for the failing command.
        errors: Vec<String>,
    },

    /// The request timed out (connect, read or write).
    #[error("eAPI request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Any other HTTP/connection failure.
    #[error("eAPI transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not a valid JSON-RPC reply.
    #[error("invalid eAPI response: {0}")]
    InvalidResponse(String),
}

impl EapiError {
    /// True for transport-level failures (anything but a rejected command).
    pub fn is_transport(&self) -> bool {
        !matches!(self, EapiError::Command { .. })
    }

    /// Flattens the error into the strings recorded against a command.
    pub fn into_messages(self) -> Vec<String> {
        match self {
            EapiError::Command { message, errors } => {
                if errors.is_empty() {
                    vec![message]
                } else {
                    errors
                }
            }
            other => vec![other.to_string()],
        }
    }
}

/// An asynchronous eAPI client bound to one device.
#[derive(Debug, Clone)]
pub struct EapiClient {
    host: String,
    port: u16,
    url: String,
    username: String,
    password: String,
    connect_timeout: Option<Duration>,
    max_connections: usize,
    client: reqwest::Client,
}

impl EapiClient {
    /// Builds a client with its own connection pool.
    pub fn new(config: EapiConfig) -> Result<Self, EapiError> {
        let port = config.port.unwrap_or_else(|| config.protocol.default_port());
        let url = format!("{}://{}:{}/command-api", config.protocol.scheme(), config.host, port);

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(config.limits.max_keepalive_connections)
            .pool_idle_timeout(config.limits.keepalive_expiry);
        if let Some(connect) = config.timeouts.connect {
            builder = builder.connect_timeout(connect);
        }
        if let Some(deadline) = config.timeouts.request_deadline() {
            builder = builder.timeout(deadline);
        }

        Ok(Self {
            host: config.host,
            port,
            url,
            username: config.username,
            password: config.password,
            connect_timeout: config.timeouts.connect,
            max_connections: config.limits.max_connections,
            client: builder.build()?,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Maximum simultaneous connections, for run-information logging.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Runs a batch of CLI commands and returns one payload per command.
    ///
    /// A rejected command surfaces as [`EapiError::Command`]; transport
    /// failures surface as [`EapiError::Timeout`] or [`EapiError::Http`].
    pub async fn cli(
        &self,
        commands: &[RawCommand],
        format: ResponseFormat,
        version: Version,
        request_id: &str,
    ) -> Result<Vec<Value>, EapiError> {
        let request = EapiRequest::run_cmds(commands, format, version, request_id);
        debug!("sending {} command(s) to {}", commands.len(), self.host);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let reply: EapiResponse = response
            .error_for_status()
            .map_err(classify_transport_error)?
            .json()
            .await
            .map_err(classify_transport_error)?;

        if let Some(error) = reply.error {
            return Err(EapiError::Command {
                errors: error.command_errors(),
                message: error.message,
            });
        }
        reply
            .result
            .ok_or_else(|| EapiError::InvalidResponse("reply carries neither result nor error".into()))
    }

    /// Cheap reachability probe: can a TCP connection be opened to the eAPI
    /// port? No credentials are exchanged.
    pub async fn check_connection(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let attempt = match self.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!("connection probe to {}:{} timed out", self.host, self.port);
                    return false;
                }
            },
            None => connect.await,
        };
        match attempt {
            Ok(_) => true,
            Err(error) => {
                debug!("connection probe to {}:{} failed: {}", self.host, self.port, error);
                false
            }
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> EapiError {
    if error.is_timeout() {
        EapiError::Timeout(error)
    } else {
        EapiError::Http(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EapiConfig {
        EapiConfig::new("switch1.example.net", "admin", "admin")
    }

    #[test]
    fn test_default_port_follows_protocol() {
        let client = EapiClient::new(config()).unwrap();
        assert_eq!(client.port(), 443);

        let mut http = config();
        http.protocol = Protocol::Http;
        let client = EapiClient::new(http).unwrap();
        assert_eq!(client.port(), 80);
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut cfg = config();
        cfg.port = Some(8080);
        let client = EapiClient::new(cfg).unwrap();
        assert_eq!(client.port(), 8080);
    }

    #[test]
    fn test_request_deadline_is_strictest_bound() {
        let timeouts = ClientTimeouts {
            connect: Some(Duration::from_secs(5)),
            read: Some(Duration::from_secs(30)),
            write: Some(Duration::from_secs(10)),
            pool: Some(Duration::from_secs(5)),
        };
        assert_eq!(timeouts.request_deadline(), Some(Duration::from_secs(10)));

        assert_eq!(ClientTimeouts::global(None).request_deadline(), None);
    }

    #[test]
    fn test_command_error_is_not_transport() {
        let rejected = EapiError::Command {
            message: "CLI command 1 of 1 'show bogus' failed".into(),
            errors: vec!["Invalid input".into()],
        };
        assert!(!rejected.is_transport());
        assert_eq!(rejected.into_messages(), vec!["Invalid input"]);
    }

    #[tokio::test]
    async fn test_check_connection_refused() {
        // Nothing listens on this port of the loopback interface.
        let mut cfg = config();
        cfg.host = "127.0.0.1".into();
        cfg.port = Some(1);
        cfg.timeouts = ClientTimeouts::global(Some(Duration::from_millis(200)));
        let client = EapiClient::new(cfg).unwrap();

        assert!(!client.check_connection().await);
    }
}

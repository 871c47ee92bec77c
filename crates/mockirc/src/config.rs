//! Configuration values for a mock server instance and its logging.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Port used when a server is created with port `0`.
pub const DEFAULT_PORT: u16 = 6661;

/// Interface the listener binds to unless configured otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Name reported in logs when none is supplied.
pub const DEFAULT_SERVER_NAME: &str = "mockirc.local";

/// Time `stop` waits for session threads to observe shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Longest inbound line, terminator included, before a session is dropped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Port selection for the listening socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", content = "port", rename_all = "snake_case")]
pub enum ListenPort {
    /// Listen on [`DEFAULT_PORT`].
    #[default]
    Default,
    /// Listen on the given port.
    Fixed(u16),
    /// Let the operating system pick a free port.
    Ephemeral,
}

impl ListenPort {
    /// Maps a raw port number, treating `0` as "use the default port".
    #[must_use]
    pub const fn from_number(port: u16) -> Self {
        if port == 0 {
            Self::Default
        } else {
            Self::Fixed(port)
        }
    }

    /// Returns the number handed to the socket bind call.
    #[must_use]
    pub const fn bind_number(self) -> u16 {
        match self {
            Self::Default => DEFAULT_PORT,
            Self::Fixed(port) => port,
            Self::Ephemeral => 0,
        }
    }
}

/// Settings for one mock server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported in logs and thread names.
    pub name: String,
    /// Host or address the listener binds to.
    pub host: String,
    /// Listening port.
    pub port: ListenPort,
    /// Pause after shutdown so in-flight sessions can exit.
    #[serde(rename = "shutdown_grace_ms", with = "duration_millis")]
    pub shutdown_grace: Duration,
    /// Maximum inbound line length in bytes.
    pub max_line_bytes: usize,
}

impl ServerConfig {
    /// Builds a configuration with defaults and the given server name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Overrides the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Overrides the listening port.
    #[must_use]
    pub const fn with_port(mut self, port: ListenPort) -> Self {
        self.port = port;
        self
    }

    /// Overrides the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Overrides the maximum inbound line length, terminator included.
    ///
    /// A limit of zero is rejected when the server starts.
    #[must_use]
    pub const fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_owned(),
            host: DEFAULT_HOST.to_owned(),
            port: ListenPort::Default,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Settings for the optional tracing subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Forces coloured output on or off; unset follows the terminal.
    pub ansi: Option<bool>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_owned(),
            format: LogFormat::default(),
            ansi: None,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, ListenPort::Default, DEFAULT_PORT)]
    #[case(7000, ListenPort::Fixed(7000), 7000)]
    fn raw_port_numbers_map_to_listen_ports(
        #[case] raw: u16,
        #[case] expected: ListenPort,
        #[case] bound: u16,
    ) {
        let port = ListenPort::from_number(raw);
        assert_eq!(port, expected);
        assert_eq!(port.bind_number(), bound);
    }

    #[test]
    fn ephemeral_port_binds_to_zero() {
        assert_eq!(ListenPort::Ephemeral.bind_number(), 0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"name":"irc.test","port":{"kind":"fixed","port":7001},"shutdown_grace_ms":50}"#,
        )
        .expect("parse config");
        assert_eq!(config.name, "irc.test");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, ListenPort::Fixed(7001));
        assert_eq!(config.shutdown_grace, Duration::from_millis(50));
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    fn grace_period_serialises_as_milliseconds() {
        let config = ServerConfig::new("irc.test")
            .with_port(ListenPort::Ephemeral)
            .with_shutdown_grace(Duration::from_millis(250));
        let value = serde_json::to_value(&config).expect("serialise config");
        assert_eq!(value["shutdown_grace_ms"], 250);
        assert_eq!(value["port"]["kind"], "ephemeral");
    }

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("COMPACT", LogFormat::Compact)]
    fn log_format_parses_case_insensitively(#[case] text: &str, #[case] expected: LogFormat) {
        assert_eq!(text.parse::<LogFormat>().expect("parse format"), expected);
    }

    #[test]
    fn logging_config_follows_terminal_unless_forced() {
        let auto: LoggingConfig = serde_json::from_str(r#"{"format":"json"}"#).expect("parse auto");
        assert_eq!(auto.ansi, None);
        assert_eq!(auto.filter, DEFAULT_LOG_FILTER);

        let forced: LoggingConfig = serde_json::from_str(r#"{"ansi":false}"#).expect("parse forced");
        assert_eq!(forced.ansi, Some(false));
        assert_eq!(forced.format, LogFormat::Compact);
    }
}

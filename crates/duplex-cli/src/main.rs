use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use duplex_transport::{ConnectionConfig, DuplexSession};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod listen;
mod send;

/// Device-side client for a duplex cloud session
///
/// Connects over WebSocket, keeps the session alive and reconnects on
/// failure. Set RUST_LOG to change log verbosity.
#[derive(Parser)]
#[command(name = "duplex", author, version)]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to topics and print every update as `path data`
    Listen(listen::Cmd),

    /// Send one task and print its response
    Send(send::Cmd),
}

/// Where and how to connect.
#[derive(Args, Debug)]
pub(crate) struct Target {
    /// Endpoint URL (ws://host:port/path?query)
    #[arg(
        long,
        env = "DUPLEX_URL",
        default_value = "ws://127.0.0.1:8080/?type=device",
        global = true
    )]
    url: String,

    /// API key appended to the request as `apiKey`
    #[arg(long, env = "DUPLEX_API_KEY", global = true)]
    api_key: Option<String>,

    /// Device token sent in the Authorization header
    #[arg(long, env = "DUPLEX_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Delay between reconnect attempts, e.g. "5s", "500ms"
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s", global = true)]
    reconnect_interval: Duration,

    /// How often the session is polled
    #[arg(long, value_parser = humantime::parse_duration, default_value = "20ms", global = true)]
    tick: Duration,
}

impl Target {
    fn config(&self) -> eyre::Result<ConnectionConfig> {
        let mut config =
            ConnectionConfig::from_url(&self.url)?.reconnect_interval(self.reconnect_interval);
        if let Some(key) = &self.api_key {
            config = config.api_key(key);
        }
        if let Some(token) = &self.token {
            config = config.token(token);
        }
        Ok(config)
    }

    pub(crate) fn session(&self) -> eyre::Result<DuplexSession> {
        let config = self.config()?;
        tracing::info!(host = %config.host, port = config.port, path = %config.path, "starting session");
        Ok(DuplexSession::new(config)?)
    }
}

pub(crate) fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|err| format!("invalid JSON: {err}"))
}

fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Listen(cmd) => listen::run(&cli.target, cmd),
        Commands::Send(cmd) => send::run(&cli.target, cmd),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parses_send_command() {
        let cli = Cli::parse_from([
            "duplex",
            "--url",
            "ws://localhost:9000/?type=device",
            "--api-key",
            "k1",
            "send",
            "/device/data/get",
            "--payload",
            r#"{"path":"voltage"}"#,
            "--timeout",
            "2s",
        ]);

        let config = cli.target.config().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9000);
        assert_eq!(config.request_path(), "/?type=device&apiKey=k1");
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));

        let Commands::Send(cmd) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(cmd.task, "/device/data/get");
        assert_eq!(cmd.payload, Some(json!({"path": "voltage"})));
        assert_eq!(cmd.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_parses_listen_command() {
        let cli = Cli::parse_from([
            "duplex",
            "listen",
            "--topic",
            "data/",
            "--topic",
            "data/voltage",
            "--tick",
            "50ms",
        ]);

        assert_eq!(cli.target.tick, Duration::from_millis(50));
        let Commands::Listen(cmd) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(cmd.topics, vec!["data/", "data/voltage"]);
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(
            Cli::try_parse_from(["duplex", "send", "ping", "--payload", "{oops"]).is_err()
        );
    }
}

use std::thread;

use clap::Args;
use duplex_transport::SessionState;
use serde_json::{Value, json};

use crate::{Target, parse_json};

/// Subscribes to one or more topics and prints updates until interrupted.
#[derive(Args, Debug)]
#[command(alias = "l")]
pub struct Cmd {
    /// Topic to subscribe to; a trailing "/" also matches every path below it
    #[arg(long = "topic", required = true)]
    pub topics: Vec<String>,

    /// Subscribe payload; derived from the topic as {"event", "path"} if omitted
    #[arg(long, value_parser = parse_json)]
    pub payload: Option<Value>,
}

/// `data/voltage` becomes `{"event": "data", "path": "voltage"}`.
fn subscription_payload(topic: &str) -> Value {
    let (event, path) = topic.split_once('/').unwrap_or((topic, ""));
    json!({"event": event, "path": path})
}

pub fn run(target: &Target, cmd: Cmd) -> eyre::Result<()> {
    let mut session = target.session()?;

    session.on_connection_event(|state| match state {
        SessionState::Connected => tracing::info!("connected, listening for updates"),
        SessionState::Disconnected => tracing::warn!("connection lost, retrying"),
    });

    for topic in &cmd.topics {
        let payload = cmd
            .payload
            .clone()
            .unwrap_or_else(|| subscription_payload(topic));
        session.subscribe(topic.as_str(), Some(payload), |update| {
            println!("{} {}", update.path, update.data);
        })?;
    }

    loop {
        session.run_once();
        thread::sleep(target.tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_payload() {
        assert_eq!(
            subscription_payload("data/voltage"),
            json!({"event": "data", "path": "voltage"})
        );
        assert_eq!(
            subscription_payload("data/"),
            json!({"event": "data", "path": ""})
        );
        assert_eq!(
            subscription_payload("status"),
            json!({"event": "status", "path": ""})
        );
    }
}

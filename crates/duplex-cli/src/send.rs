use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use clap::Args;
use duplex_transport::{
    Clock, DuplexSession, Response, Socket, TransportError, TransportResult,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{Target, parse_json};

/// Sends a single task and prints the response.
///
/// The request is queued right away and goes out as soon as the
/// connection is up.
#[derive(Args, Debug)]
#[command(alias = "s")]
pub struct Cmd {
    /// Task name, e.g. "/device/data/get"
    pub task: String,

    /// JSON payload
    #[arg(long, value_parser = parse_json)]
    pub payload: Option<Value>,

    /// How long to wait for the response, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub timeout: Duration,
}

pub fn run(target: &Target, cmd: Cmd) -> eyre::Result<()> {
    let mut session = target.session()?;
    let reply: Arc<Mutex<Option<Response>>> = Arc::default();

    let sink = reply.clone();
    let id = session.send(
        &cmd.task,
        cmd.payload,
        Some(Box::new(move |response| *sink.lock() = Some(response))),
    )?;
    tracing::debug!(%id, task = %cmd.task, "request queued");

    let result = wait_for_response(&mut session, &reply, cmd.timeout, target.tick);
    session.disconnect();
    let response = result?;

    println!(
        "{} {}",
        response.code.as_deref().unwrap_or("-"),
        response.payload
    );
    Ok(())
}

/// Polls until the response lands in `reply`.
///
/// A request that went out on a connection which then dropped has lost its
/// handler, so that ends the wait early.
fn wait_for_response<S: Socket, C: Clock>(
    session: &mut DuplexSession<S, C>,
    reply: &Mutex<Option<Response>>,
    timeout: Duration,
    tick: Duration,
) -> TransportResult<Response> {
    let deadline = Instant::now() + timeout;
    let mut was_connected = session.is_connected();
    loop {
        if let Some(response) = reply.lock().take() {
            return Ok(response);
        }
        if was_connected && !session.is_connected() {
            return Err(TransportError::connection_closed(Some(
                "connection lost before the response arrived".to_string(),
            )));
        }
        if Instant::now() >= deadline {
            return Err(TransportError::timeout(timeout));
        }

        was_connected = session.is_connected();
        session.run_once();
        thread::sleep(tick);
    }
}

#[cfg(test)]
mod tests {
    use duplex_transport::{ConnectionConfig, ManualClock, MemoryPeer, MemorySocket, task};
    use duplex_wire::handshake::accept_key;

    use super::*;

    fn session() -> (DuplexSession<MemorySocket, ManualClock>, MemoryPeer) {
        let (socket, peer) = MemorySocket::pair();
        let config = ConnectionConfig::new("h", 80);
        let session = DuplexSession::with_parts(config, socket, ManualClock::new()).unwrap();
        (session, peer)
    }

    fn answer_upgrade(peer: &MemoryPeer) {
        let request = String::from_utf8(peer.take_outbound().to_vec()).unwrap();
        let key = request
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap()
            .trim()
            .to_string();
        peer.push(
            format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\r\n",
                accept_key(&key)
            )
            .as_bytes(),
        );
    }

    #[test]
    fn test_lost_connection_ends_wait() {
        let (mut session, peer) = session();
        let reply = Mutex::new(None);
        session.send(task::DEVICE_DATA_GET, None, None).unwrap();

        session.run_once();
        answer_upgrade(&peer);
        session.run_once();
        assert!(session.is_connected());

        peer.close_connection();
        let err = wait_for_response(
            &mut session,
            &reply,
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed { .. }));
    }

    #[test]
    fn test_wait_times_out_offline() {
        let (mut session, peer) = session();
        peer.refuse_connections(true);
        let reply = Mutex::new(None);

        let err = wait_for_response(
            &mut session,
            &reply,
            Duration::from_millis(20),
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}

//! Full session over a real TCP socket against a minimal blocking server.

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use bytes::BytesMut;
use duplex_transport::{ConnectionConfig, DuplexSession, Response, task};
use duplex_wire::{Role, codec::Codec, frame::Frame, handshake::accept_key};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::codec::{Decoder, Encoder};

/// Completes the upgrade, then answers every text envelope with a
/// `DONE` response carrying the request payload back.
fn serve_one(listener: TcpListener) {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    let mut key = String::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Sec-WebSocket-Key: ") {
            key = value.trim().to_string();
        }
    }

    write!(
        writer,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Set-Cookie: session=abc; HttpOnly\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(&key)
    )
    .unwrap();

    let mut codec = Codec::new(Role::Server, 1 << 20);
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 1024];
    loop {
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            let Ok(request) = serde_json::from_slice::<Value>(frame.payload()) else {
                continue;
            };
            let reply = json!({
                "header": request["header"],
                "payload": {"code": "DONE", "message": "ok", "echo": request["payload"]},
            });

            let mut out = BytesMut::new();
            codec
                .encode(Frame::text(reply.to_string()), &mut out)
                .unwrap();
            if writer.write_all(&out).is_err() {
                return;
            }
        }

        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn poll_until(session: &mut DuplexSession, deadline: Duration, mut done: impl FnMut() -> bool) {
    let until = Instant::now() + deadline;
    while !done() && Instant::now() < until {
        session.run_once();
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_request_response_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || serve_one(listener));

    let config = ConnectionConfig::new("127.0.0.1", port).api_key("k");
    let mut session = DuplexSession::new(config).unwrap();

    let responses: Arc<Mutex<Vec<Response>>> = Arc::default();
    let sink = responses.clone();
    // queued before the connection exists, replayed once it does
    session
        .send(
            task::DEVICE_DATA_GET,
            Some(json!({"path": "voltage"})),
            Some(Box::new(move |response| sink.lock().push(response))),
        )
        .unwrap();

    poll_until(&mut session, Duration::from_secs(5), || {
        !responses.lock().is_empty()
    });

    assert!(session.is_connected());
    assert_eq!(session.session_id(), Some("abc"));
    {
        let responses = responses.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].code.as_deref(), Some("DONE"));
        assert_eq!(responses[0].payload, json!({"echo": {"path": "voltage"}}));
    }
    assert_eq!(session.buffered_messages(), 0);

    session.disconnect();
    assert!(!session.is_connected());
    server.join().unwrap();
}

#[test]
fn test_refused_connection_stays_offline() {
    // bind and drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());

    let mut session = DuplexSession::new(ConnectionConfig::new("127.0.0.1", port)).unwrap();
    session.send(task::PING, None, None).unwrap();
    session.run_once();

    assert!(!session.is_connected());
    assert_eq!(session.buffered_messages(), 1);
}

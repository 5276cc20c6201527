//! Byte-stream collaborators.
//!
//! The connection engine never blocks on reads: [`Socket::read_available`]
//! hands over whatever is buffered and returns `Ok(0)` when nothing is.
//! Writes that the OS cannot take right away are held and flushed on the
//! next poll.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

/// Upper bound on bytes pulled from the OS in one `read_available` call.
const MAX_READ_PER_POLL: usize = 64 * 1024;

/// A connectable byte stream.
///
/// TLS, when needed, is negotiated inside the implementation before bytes
/// reach the engine.
pub trait Socket {
    /// Opens a connection, replacing any previous one.
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<()>;

    /// Appends every byte currently available to `dst`.
    ///
    /// Returns `Ok(0)` when nothing is pending. An orderly shutdown by the
    /// peer is reported as [`io::ErrorKind::UnexpectedEof`].
    fn read_available(&mut self, dst: &mut BytesMut) -> io::Result<usize>;

    /// Queues `data` and writes as much as possible without blocking.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Writes out data left over from earlier calls to [`Socket::write`].
    fn flush(&mut self) -> io::Result<()>;

    /// Bytes accepted by [`Socket::write`] that have not reached the OS yet.
    fn backlog(&self) -> usize;

    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Non-blocking TCP socket.
#[derive(Debug, Default)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
    pending: BytesMut,
    eof: bool,
}

impl TcpSocket {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Socket for TcpSocket {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<()> {
        self.close();

        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} did not resolve"),
            )
        }))
    }

    fn read_available(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        if self.eof {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let mut chunk = [0u8; 4096];
        let mut total = 0;
        while total < MAX_READ_PER_POLL {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    if total == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    break;
                }
                Ok(n) => {
                    dst.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.pending.extend_from_slice(data);
        self.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        while !self.pending.is_empty() {
            match stream.write(&self.pending) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.pending.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn backlog(&self) -> usize {
        self.pending.len()
    }

    fn close(&mut self) {
        if self.stream.is_some() {
            let _ = self.flush();
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.pending.clear();
        self.eof = false;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.eof
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    refuse: bool,
    fail_writes: bool,
    eof: bool,
    connects: usize,
    last_target: Option<(String, u16)>,
    inbound: BytesMut,
    outbound: BytesMut,
    /// Bytes the peer still takes before writes stall; `None` is unlimited.
    accept_budget: Option<usize>,
    backlog: BytesMut,
}

impl MemoryState {
    fn drain_backlog(&mut self) {
        let n = match self.accept_budget {
            Some(budget) => budget.min(self.backlog.len()),
            None => self.backlog.len(),
        };
        let chunk = self.backlog.split_to(n);
        self.outbound.extend_from_slice(&chunk);
        if let Some(budget) = self.accept_budget.as_mut() {
            *budget -= n;
        }
    }
}

/// In-memory socket for tests and simulations.
///
/// The matching [`MemoryPeer`] plays the server: it scripts inbound bytes,
/// collects what the client wrote, and can refuse or drop connections.
#[derive(Debug, Clone)]
pub struct MemorySocket {
    state: Arc<Mutex<MemoryState>>,
}

/// Server-side handle of a [`MemorySocket`].
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySocket {
    /// Creates a socket and its peer handle.
    pub fn pair() -> (Self, MemoryPeer) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        (
            Self {
                state: state.clone(),
            },
            MemoryPeer { state },
        )
    }
}

impl Socket for MemorySocket {
    fn connect(&mut self, host: &str, port: u16, _timeout: Duration) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        state.connected = true;
        state.eof = false;
        state.connects += 1;
        state.last_target = Some((host.to_string(), port));
        state.inbound.clear();
        state.backlog.clear();
        Ok(())
    }

    fn read_available(&mut self, dst: &mut BytesMut) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if state.inbound.is_empty() && state.eof {
            state.connected = false;
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let n = state.inbound.len();
        let bytes = state.inbound.split();
        dst.extend_from_slice(&bytes);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if state.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.backlog.extend_from_slice(data);
        state.drain_backlog();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        state.drain_backlog();
        Ok(())
    }

    fn backlog(&self) -> usize {
        self.state.lock().backlog.len()
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.backlog.clear();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl MemoryPeer {
    /// Makes `data` readable by the client.
    pub fn push(&self, data: &[u8]) {
        self.state.lock().inbound.extend_from_slice(data);
    }

    /// Takes everything the client has written so far.
    pub fn take_outbound(&self) -> BytesMut {
        self.state.lock().outbound.split()
    }

    /// Ends the stream once buffered inbound bytes are consumed.
    pub fn close_connection(&self) {
        self.state.lock().eof = true;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Stops reading after `budget` more bytes, like a peer whose receive
    /// window has closed. `None` reads everything again.
    pub fn stall_writes(&self, budget: Option<usize>) {
        self.state.lock().accept_budget = budget;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn last_target(&self) -> Option<(String, u16)> {
        self.state.lock().last_target.clone()
    }
}

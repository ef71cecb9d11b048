use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use crate::event::{EventState, Readiness};
use crate::poller::{Poller, ReadyTable};

/// Lifecycle of a connection handle. `Closed` is terminal for half-closed
/// pairs; fully closed handles leave the socket table entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Pending,
    Open,
    HalfClosedRead,
    HalfClosedWrite,
    Closed,
    Errored,
}

#[derive(Debug)]
enum Sock {
    Listener(TcpListener),
    Stream(TcpStream),
}

#[derive(Debug)]
struct Entry {
    sock: Sock,
    status: ConnStatus,
}

#[derive(Debug)]
struct Tables {
    next_handle: i32,
    sockets: HashMap<i32, Entry>,
}

impl Tables {
    fn alloc(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.saturating_add(1);
        handle
    }
}

/// The virtual TCP layer: synchronous listen/accept/dial/read/write calls
/// over non-blocking host sockets. Would-block conditions park the caller on
/// the handle's Event State until the poller reports fresh readiness; no
/// lock is held while a call is parked.
#[derive(Debug)]
pub struct NetStack {
    tables: Mutex<Tables>,
    ready: Arc<ReadyTable>,
    poller: Poller,
}

impl NetStack {
    pub fn new() -> io::Result<Self> {
        let ready = Arc::new(ReadyTable::default());
        let poller = Poller::spawn(Arc::clone(&ready))?;
        Ok(Self {
            tables: Mutex::new(Tables {
                next_handle: 1,
                sockets: HashMap::new(),
            }),
            ready,
            poller,
        })
    }

    /// The readiness-notification channel; external drivers push
    /// `(handle, bits)` batches through it.
    pub fn notifier(&self) -> Arc<ReadyTable> {
        Arc::clone(&self.ready)
    }

    pub fn listen(&self, addr: SocketAddr) -> io::Result<i32> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        socket.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(socket.into());
        let mut tables = self.tables.lock().unwrap();
        let handle = tables.alloc();
        self.poller.register(&mut listener, handle)?;
        self.ready.register(handle);
        tables.sockets.insert(
            handle,
            Entry {
                sock: Sock::Listener(listener),
                status: ConnStatus::Open,
            },
        );
        Ok(handle)
    }

    pub fn accept(&self, listener: i32) -> io::Result<i32> {
        let state = self.state(listener)?;
        loop {
            let mut tables = self.tables.lock().unwrap();
            let accepted = {
                let entry = tables.sockets.get_mut(&listener).ok_or_else(not_found)?;
                let Sock::Listener(l) = &mut entry.sock else {
                    return Err(not_a_listener());
                };
                match l.accept() {
                    Ok((stream, _)) => Some(stream),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                    Err(err) => return Err(err),
                }
            };
            match accepted {
                Some(mut stream) => {
                    let handle = tables.alloc();
                    self.poller.register(&mut stream, handle)?;
                    self.ready.register(handle);
                    tables.sockets.insert(
                        handle,
                        Entry {
                            sock: Sock::Stream(stream),
                            status: ConnStatus::Open,
                        },
                    );
                    return Ok(handle);
                }
                None => {
                    drop(tables);
                    match state.wait_read()? {
                        Readiness::Ready => continue,
                        Readiness::Hangup => return Err(closed("listener closed")),
                        Readiness::Errored => return Err(self.take_error(listener)),
                    }
                }
            }
        }
    }

    pub fn dial(&self, addr: SocketAddr) -> io::Result<i32> {
        let mut stream = TcpStream::connect(addr)?;
        let handle = {
            let mut tables = self.tables.lock().unwrap();
            let handle = tables.alloc();
            self.poller.register(&mut stream, handle)?;
            self.ready.register(handle);
            tables.sockets.insert(
                handle,
                Entry {
                    sock: Sock::Stream(stream),
                    status: ConnStatus::Pending,
                },
            );
            handle
        };
        let state = self.state(handle)?;
        match state.wait_write()? {
            Readiness::Ready => {}
            Readiness::Hangup | Readiness::Errored => {
                let err = self.take_error(handle);
                self.set_status(handle, ConnStatus::Errored);
                return Err(err);
            }
        }
        // connect(2) reports failure through SO_ERROR once writable
        if let Some(err) = self.pending_error(handle)? {
            self.set_status(handle, ConnStatus::Errored);
            return Err(err);
        }
        self.set_status(handle, ConnStatus::Open);
        Ok(handle)
    }

    pub fn read(&self, handle: i32, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.state(handle)?;
        loop {
            let n = {
                let mut tables = self.tables.lock().unwrap();
                let entry = tables.sockets.get_mut(&handle).ok_or_else(not_found)?;
                if matches!(entry.status, ConnStatus::HalfClosedRead | ConnStatus::Closed) {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "read side is closed",
                    ));
                }
                let Sock::Stream(stream) = &mut entry.sock else {
                    return Err(not_a_stream());
                };
                match stream.read(buf) {
                    Ok(n) => Some(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                    Err(err) => return Err(err),
                }
            };
            match n {
                Some(n) => return Ok(n),
                None => match state.wait_read()? {
                    Readiness::Ready => continue,
                    // peer is gone and nothing is buffered: end of stream
                    Readiness::Hangup => return Ok(0),
                    Readiness::Errored => return Err(self.take_error(handle)),
                },
            }
        }
    }

    pub fn write(&self, handle: i32, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.state(handle)?;
        loop {
            let n = {
                let mut tables = self.tables.lock().unwrap();
                let entry = tables.sockets.get_mut(&handle).ok_or_else(not_found)?;
                if matches!(entry.status, ConnStatus::HalfClosedWrite | ConnStatus::Closed) {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "write side is closed",
                    ));
                }
                let Sock::Stream(stream) = &mut entry.sock else {
                    return Err(not_a_stream());
                };
                match stream.write(buf) {
                    Ok(n) => Some(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                    Err(err) => return Err(err),
                }
            };
            match n {
                Some(n) => return Ok(n),
                None => match state.wait_write()? {
                    Readiness::Ready => continue,
                    Readiness::Hangup => {
                        return Err(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "connection closed by peer",
                        ));
                    }
                    Readiness::Errored => return Err(self.take_error(handle)),
                },
            }
        }
    }

    /// `how`: 1 = read half, 2 = write half, 3 = both (the guest ABI values).
    pub fn shutdown(&self, handle: i32, how: i32) -> io::Result<()> {
        let dir = match how {
            1 => Shutdown::Read,
            2 => Shutdown::Write,
            3 => Shutdown::Both,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid shutdown direction: {how}"),
                ));
            }
        };
        let mut tables = self.tables.lock().unwrap();
        let entry = tables.sockets.get_mut(&handle).ok_or_else(not_found)?;
        let Sock::Stream(stream) = &mut entry.sock else {
            return Err(not_a_stream());
        };
        stream.shutdown(dir)?;
        entry.status = match (entry.status, how) {
            (ConnStatus::HalfClosedWrite, 1) | (ConnStatus::HalfClosedRead, 2) => ConnStatus::Closed,
            (_, 1) => ConnStatus::HalfClosedRead,
            (_, 2) => ConnStatus::HalfClosedWrite,
            _ => ConnStatus::Closed,
        };
        Ok(())
    }

    pub fn close_read(&self, handle: i32) -> io::Result<()> {
        self.shutdown(handle, 1)
    }

    pub fn close_write(&self, handle: i32) -> io::Result<()> {
        self.shutdown(handle, 2)
    }

    /// Drops the socket. Closing twice is fine; the Event State entry is
    /// kept so late readiness updates and stale waiters stay harmless.
    pub fn close(&self, handle: i32) -> io::Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(mut entry) = tables.sockets.remove(&handle) {
            let _ = match &mut entry.sock {
                Sock::Listener(l) => self.poller.deregister(l),
                Sock::Stream(s) => self.poller.deregister(s),
            };
        }
        Ok(())
    }

    pub fn set_read_deadline(&self, handle: i32, at: Option<Instant>) -> io::Result<()> {
        self.state(handle)?.set_read_deadline(at);
        Ok(())
    }

    pub fn set_write_deadline(&self, handle: i32, at: Option<Instant>) -> io::Result<()> {
        self.state(handle)?.set_write_deadline(at);
        Ok(())
    }

    pub fn local_addr(&self, handle: i32) -> io::Result<SocketAddr> {
        let tables = self.tables.lock().unwrap();
        match &tables.sockets.get(&handle).ok_or_else(not_found)?.sock {
            Sock::Listener(l) => l.local_addr(),
            Sock::Stream(s) => s.local_addr(),
        }
    }

    pub fn peer_addr(&self, handle: i32) -> io::Result<SocketAddr> {
        let tables = self.tables.lock().unwrap();
        match &tables.sockets.get(&handle).ok_or_else(not_found)?.sock {
            Sock::Stream(s) => s.peer_addr(),
            Sock::Listener(_) => Err(not_a_stream()),
        }
    }

    pub fn status(&self, handle: i32) -> io::Result<ConnStatus> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.sockets.get(&handle).ok_or_else(not_found)?.status)
    }

    /// Error side channel: drains the pending socket error for a handle,
    /// falling back to a generic message when the OS has nothing to report.
    pub fn take_error(&self, handle: i32) -> io::Error {
        match self.pending_error(handle) {
            Ok(Some(err)) => err,
            Ok(None) => io::Error::other("network error"),
            Err(err) => err,
        }
    }

    /// Drains `SO_ERROR` without synthesizing a fallback message.
    pub fn pending_error(&self, handle: i32) -> io::Result<Option<io::Error>> {
        let tables = self.tables.lock().unwrap();
        match &tables.sockets.get(&handle).ok_or_else(not_found)?.sock {
            Sock::Listener(l) => l.take_error(),
            Sock::Stream(s) => s.take_error(),
        }
    }

    fn set_status(&self, handle: i32, status: ConnStatus) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(entry) = tables.sockets.get_mut(&handle) {
            entry.status = status;
        }
    }

    fn state(&self, handle: i32) -> io::Result<Arc<EventState>> {
        self.ready.get(handle).ok_or_else(not_found)
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "network handle not found")
}

fn not_a_listener() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "handle is not a listener")
}

fn not_a_stream() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "handle is not a connection")
}

fn closed(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, msg.to_string())
}

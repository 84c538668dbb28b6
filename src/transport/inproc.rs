//! In-process transport: two bounded byte pipes per connection and a
//! process-local listener registry keyed by address.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{Acceptor, Endpoint, Line, Result, Scheme, TetherError, Transport};

use super::{Stream, deadline_after};

/// One direction of an in-process connection.
struct Pipe {
    state: Mutex<PipeState>,
    capacity: usize,
    readable: Condvar,
    writable: Condvar,
}

struct PipeState {
    buf: VecDeque<u8>,
    connected: bool,
}

impl Pipe {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeState { buf: VecDeque::with_capacity(capacity), connected: true }),
            capacity,
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }

    /// Returns `Ok(0)` only once the pipe is disconnected and drained.
    fn read(&self, dst: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        let deadline = timeout.and_then(deadline_after);
        let mut st = self.state.lock();

        while st.buf.is_empty() {
            if !st.connected {
                return Ok(0);
            }
            match deadline {
                None => self.readable.wait(&mut st),
                Some(deadline) => {
                    if self.readable.wait_until(&mut st, deadline).timed_out()
                        && st.buf.is_empty()
                        && st.connected
                    {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                }
            }
        }

        let n = dst.len().min(st.buf.len());
        for (d, s) in dst.iter_mut().zip(st.buf.drain(..n)) {
            *d = s;
        }
        self.writable.notify_all();
        Ok(n)
    }

    /// Copies as much of `src` as currently fits, blocking only while the
    /// pipe is completely full.
    fn write(&self, src: &[u8], timeout: Option<Duration>) -> io::Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let deadline = timeout.and_then(deadline_after);
        let mut st = self.state.lock();

        loop {
            if !st.connected {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let space = self.capacity - st.buf.len();
            if space > 0 {
                let n = space.min(src.len());
                st.buf.extend(&src[..n]);
                self.readable.notify_all();
                return Ok(n);
            }
            match deadline {
                None => self.writable.wait(&mut st),
                Some(deadline) => {
                    if self.writable.wait_until(&mut st, deadline).timed_out()
                        && st.buf.len() == self.capacity
                        && st.connected
                    {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                }
            }
        }
    }

    fn disconnect(&self) {
        let mut st = self.state.lock();
        if st.connected {
            st.connected = false;
            self.readable.notify_all();
            self.writable.notify_all();
        }
    }
}

/// One end of an in-process duplex connection.
pub struct InprocStream {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl InprocStream {
    /// Creates a connected pair; whatever one end writes the other reads.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let a = Pipe::new(capacity);
        let b = Pipe::new(capacity);
        (
            Self { rx: a.clone(), tx: b.clone(), read_timeout: None, write_timeout: None },
            Self { rx: b, tx: a, read_timeout: None, write_timeout: None },
        )
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rx.read(buf, self.read_timeout)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.write(buf, self.write_timeout)
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    #[cfg(unix)]
    pub(crate) fn readiness(&self) -> InprocReadiness {
        InprocReadiness { rx: self.rx.clone(), tx: self.tx.clone() }
    }

    /// Marks both directions disconnected; the peer drains what is left.
    pub fn disconnect(&self) {
        self.rx.disconnect();
        self.tx.disconnect();
    }
}

impl Drop for InprocStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Non-blocking view of an inproc stream's pipes, kept by a `Poller`.
#[cfg(unix)]
pub(crate) struct InprocReadiness {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hung_up: bool,
}

#[cfg(unix)]
impl InprocReadiness {
    pub(crate) fn check(&self) -> Readiness {
        let (readable, hung_up) = {
            let st = self.rx.state.lock();
            (!st.buf.is_empty(), !st.connected)
        };
        let writable = {
            let st = self.tx.state.lock();
            st.connected && st.buf.len() < self.tx.capacity
        };
        Readiness { readable, writable, hung_up }
    }
}

type Registry = Mutex<HashMap<String, Arc<Backlog>>>;

/// Dialed-but-not-yet-accepted connections for one listening address.
struct Backlog {
    state: Mutex<BacklogState>,
    ready: Condvar,
}

struct BacklogState {
    pending: VecDeque<InprocStream>,
    open: bool,
}

impl Backlog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BacklogState { pending: VecDeque::new(), open: true }),
            ready: Condvar::new(),
        })
    }
}

/// Listening side of an `inproc://` address.
pub(crate) struct InprocListener {
    address: String,
    backlog: Arc<Backlog>,
    registry: Weak<Registry>,
}

impl InprocListener {
    /// `None` on timeout or once the listener is closed.
    pub(crate) fn accept(&self, timeout: Duration) -> Option<InprocStream> {
        let deadline = deadline_after(timeout);
        let mut st = self.backlog.state.lock();
        loop {
            if let Some(stream) = st.pending.pop_front() {
                return Some(stream);
            }
            if !st.open {
                return None;
            }
            match deadline {
                None => self.backlog.ready.wait(&mut st),
                Some(deadline) => {
                    if self.backlog.ready.wait_until(&mut st, deadline).timed_out() {
                        return if st.open { st.pending.pop_front() } else { None };
                    }
                }
            }
        }
    }

    pub(crate) fn close(&self) {
        let dropped = {
            let mut st = self.backlog.state.lock();
            st.open = false;
            std::mem::take(&mut st.pending)
        };
        self.backlog.ready.notify_all();

        if !dropped.is_empty() {
            warn!(address = %self.address, count = dropped.len(), "dropping unaccepted inproc connections");
        }
        drop(dropped);

        if let Some(registry) = self.registry.upgrade() {
            let mut map = registry.lock();
            if map.get(&self.address).is_some_and(|b| Arc::ptr_eq(b, &self.backlog)) {
                map.remove(&self.address);
            }
        }
        debug!(address = %self.address, "inproc listener closed");
    }
}

/// `inproc://name` transport. Owns the address → listener registry.
pub struct InprocTransport {
    registry: Arc<Registry>,
    buffer_size: usize,
}

impl InprocTransport {
    pub fn new(buffer_size: usize) -> Self {
        Self { registry: Arc::new(Mutex::new(HashMap::new())), buffer_size: buffer_size.max(1) }
    }

    /// Number of addresses currently listening.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().len()
    }
}

impl Transport for InprocTransport {
    fn scheme(&self) -> Scheme { Scheme::Inproc }

    fn connect(&self, endpoint: &Endpoint) -> Result<Line> {
        let address = endpoint.address();
        let backlog = self.registry.lock().get(address).cloned().ok_or_else(|| {
            TetherError::connect_failure(address, io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"))
        })?;

        let (client, server) = InprocStream::pair(self.buffer_size);
        {
            let mut st = backlog.state.lock();
            if !st.open {
                return Err(TetherError::connect_failure(
                    address,
                    io::Error::new(io::ErrorKind::ConnectionRefused, "listener closed"),
                ));
            }
            st.pending.push_back(server);
        }
        backlog.ready.notify_one();

        debug!(%endpoint, "inproc connected");
        Ok(Line::new(Stream::Inproc(client), endpoint.clone()))
    }

    fn listen(&self, endpoint: &Endpoint) -> Result<Acceptor> {
        let address = endpoint.address();
        let backlog = {
            let mut map = self.registry.lock();
            if map.contains_key(address) {
                return Err(TetherError::listen_failure(
                    address,
                    io::Error::new(io::ErrorKind::AddrInUse, "address already registered"),
                ));
            }
            let backlog = Backlog::new();
            map.insert(address.to_owned(), backlog.clone());
            backlog
        };

        debug!(%endpoint, "inproc listening");
        let listener = InprocListener {
            address: address.to_owned(),
            backlog,
            registry: Arc::downgrade(&self.registry),
        };
        Ok(Acceptor::from_inproc(endpoint.clone(), listener))
    }
}

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    Endpoint, Line, Result,
    transport::{SocketListener, Stream, deadline_after, inproc::InprocListener},
};

enum Listening {
    Socket { listener: Mutex<Option<SocketListener>>, poll_interval: Duration },
    Inproc(InprocListener),
}

/// Listening handle bound to one endpoint.
///
/// `wait_connection` and `close` take `&self`, so an `Arc<Acceptor>` can be
/// closed from one thread while another is waiting on it.
pub struct Acceptor {
    endpoint: Endpoint,
    listening: Listening,
    closed: AtomicBool,
}

impl Acceptor {
    pub(crate) fn from_socket(endpoint: Endpoint, listener: SocketListener, poll_interval: Duration) -> Self {
        Self {
            endpoint,
            listening: Listening::Socket {
                listener: Mutex::new(Some(listener)),
                poll_interval: poll_interval.max(Duration::from_millis(1)),
            },
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn from_inproc(endpoint: Endpoint, listener: InprocListener) -> Self {
        Self { endpoint, listening: Listening::Inproc(listener), closed: AtomicBool::new(false) }
    }

    pub fn endpoint(&self) -> &Endpoint { &self.endpoint }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for an incoming connection.
    ///
    /// `Ok(None)` on timeout and once the acceptor is closed; callers poll
    /// in a loop. The returned line has default options.
    pub fn wait_connection(&self, timeout: Duration) -> Result<Option<Line>> {
        if self.is_closed() {
            return Ok(None);
        }
        let stream = match &self.listening {
            Listening::Inproc(listener) => listener.accept(timeout).map(Stream::Inproc),
            Listening::Socket { listener, poll_interval } => {
                self.poll_socket(listener, *poll_interval, timeout)?
            }
        };

        Ok(stream.map(|stream| {
            debug!(endpoint = %self.endpoint, "accepted connection");
            Line::new(stream, self.endpoint.clone())
        }))
    }

    fn poll_socket(
        &self,
        listener: &Mutex<Option<SocketListener>>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Option<Stream>> {
        let deadline = deadline_after(timeout);
        loop {
            {
                let guard = listener.lock();
                let Some(l) = guard.as_ref() else { return Ok(None) };
                if let Some(stream) = l.try_accept()? {
                    return Ok(Some(stream));
                }
            }

            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if left.is_some_and(|l| l.is_zero()) || self.is_closed() {
                return Ok(None);
            }
            thread::sleep(left.map_or(poll_interval, |l| l.min(poll_interval)));
        }
    }

    /// Stops listening and wakes any in-flight `wait_connection`.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.listening {
            Listening::Socket { listener, .. } => {
                if let Some(l) = listener.lock().take() {
                    l.close();
                }
            }
            Listening::Inproc(listener) => listener.close(),
        }
        debug!(endpoint = %self.endpoint, "acceptor closed");
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

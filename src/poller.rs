//! Readiness polling over several lines at once.
//!
//! Socket lines are watched with `poll(2)` on their descriptors. Inproc
//! lines have none, so while any are registered the wait is cut into
//! slices of `inproc_interval` and their pipes are checked between slices.

use std::{
    collections::HashMap,
    io,
    os::fd::{AsRawFd, RawFd},
    time::{Duration, Instant},
};

use bitflags::bitflags;
use tracing::trace;

use crate::{
    Line, ManagerConfig, Result, TetherError,
    transport::{Stream, deadline_after, inproc::{InprocReadiness, Readiness}},
};

bitflags! {
    /// Conditions a `Poller` watches for and reports per line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineEvents: u8 {
        /// A read will not block: data is buffered or the peer hung up.
        const READ = 1 << 0;
        /// A write will accept at least one byte without blocking.
        const WRITE = 1 << 1;
        /// The line failed. Reported even when not requested.
        const ERROR = 1 << 2;
    }
}

/// Handle for a line registered with a `Poller`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollKey(u64);

enum Source {
    Fd(RawFd),
    Inproc(InprocReadiness),
}

impl Source {
    fn of(line: &Line) -> Result<Self> {
        match line.stream_ref() {
            None => Err(TetherError::connection_lost().ctx("cannot poll a closed line")),
            Some(Stream::Tcp(s)) => Ok(Self::Fd(s.as_raw_fd())),
            Some(Stream::Local(s)) => Ok(Self::Fd(s.as_raw_fd())),
            Some(Stream::Inproc(s)) => Ok(Self::Inproc(s.readiness())),
        }
    }
}

struct Entry {
    key: PollKey,
    source: Source,
    interest: LineEvents,
}

/// Waits until any of a set of lines becomes readable or writable.
///
/// The poller does not own the lines. A socket line must be removed before
/// it is closed, since its descriptor number may be reused afterwards.
pub struct Poller {
    entries: Vec<Entry>,
    ready: HashMap<PollKey, LineEvents>,
    next_key: u64,
    inproc_interval: Duration,
}

impl Poller {
    pub fn new() -> Self {
        Self::with_interval(ManagerConfig::default().accept_poll_interval)
    }

    /// `inproc_interval` is how often inproc lines are re-checked while
    /// waiting.
    pub fn with_interval(inproc_interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            ready: HashMap::new(),
            next_key: 0,
            inproc_interval: inproc_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn add_line(&mut self, line: &Line, interest: LineEvents) -> Result<PollKey> {
        if interest.is_empty() {
            return Err(TetherError::invalid_argument("no events requested"));
        }
        let source = Source::of(line)?;
        let key = PollKey(self.next_key);
        self.next_key += 1;
        self.entries.push(Entry { key, source, interest });
        Ok(key)
    }

    /// Returns `false` if `key` was not registered.
    pub fn remove_line(&mut self, key: PollKey) -> bool {
        self.ready.remove(&key);
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        before != self.entries.len()
    }

    /// Blocks up to `timeout` for any registered line to become ready.
    ///
    /// `Ok(true)` when at least one line has events; read them with
    /// `events_for`. A zero timeout only checks. With nothing registered it
    /// returns `Ok(false)` at once.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool> {
        self.ready.clear();
        if self.entries.is_empty() {
            return Ok(false);
        }

        let deadline = deadline_after(timeout);
        let has_inproc = self.entries.iter().any(|e| matches!(e.source, Source::Inproc(_)));
        // inproc slots keep fd -1, which poll(2) skips
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|e| libc::pollfd {
                fd: match e.source {
                    Source::Fd(fd) => fd,
                    Source::Inproc(_) => -1,
                },
                events: poll_interest(e.interest),
                revents: 0,
            })
            .collect();

        loop {
            for entry in &self.entries {
                if let Source::Inproc(pipes) = &entry.source {
                    let events = inproc_events(pipes.check(), entry.interest);
                    if !events.is_empty() {
                        self.ready.insert(entry.key, events);
                    }
                }
            }

            let wait = if !self.ready.is_empty() {
                Some(Duration::ZERO)
            } else {
                let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                match (left, has_inproc) {
                    (Some(left), true) => Some(left.min(self.inproc_interval)),
                    (None, true) => Some(self.inproc_interval),
                    (left, false) => left,
                }
            };
            poll_fds(&mut fds, wait)?;

            for (entry, fd) in self.entries.iter().zip(&fds) {
                if matches!(entry.source, Source::Fd(_)) && fd.revents != 0 {
                    let events = fd_events(fd.revents, entry.interest);
                    if !events.is_empty() {
                        self.ready.insert(entry.key, events);
                    }
                }
            }

            if !self.ready.is_empty() {
                trace!(ready = self.ready.len(), "poll ready");
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
        }
    }

    /// Events from the last `poll`; empty for lines that were not ready.
    pub fn events_for(&self, key: PollKey) -> LineEvents {
        self.ready.get(&key).copied().unwrap_or(LineEvents::empty())
    }
}

impl Default for Poller {
    fn default() -> Self { Self::new() }
}

fn poll_interest(interest: LineEvents) -> libc::c_short {
    let mut bits = 0;
    if interest.contains(LineEvents::READ) {
        bits |= libc::POLLIN;
    }
    if interest.contains(LineEvents::WRITE) {
        bits |= libc::POLLOUT;
    }
    bits
}

/// A hang-up reads as EOF, so it is `READ` when reads are watched and
/// `ERROR` otherwise.
fn report(readable: bool, writable: bool, hung_up: bool, failed: bool, interest: LineEvents) -> LineEvents {
    let wants_read = interest.contains(LineEvents::READ);
    let mut events = LineEvents::empty();
    if readable || (hung_up && wants_read) {
        events |= LineEvents::READ;
    }
    if writable {
        events |= LineEvents::WRITE;
    }
    events &= interest;
    if failed || (hung_up && !wants_read) {
        events |= LineEvents::ERROR;
    }
    events
}

fn fd_events(revents: libc::c_short, interest: LineEvents) -> LineEvents {
    report(
        revents & libc::POLLIN != 0,
        revents & libc::POLLOUT != 0,
        revents & libc::POLLHUP != 0,
        revents & (libc::POLLERR | libc::POLLNVAL) != 0,
        interest,
    )
}

fn inproc_events(state: Readiness, interest: LineEvents) -> LineEvents {
    report(state.readable, state.writable, state.hung_up, false, interest)
}

/// `None` waits without a deadline. Interrupted waits count as "nothing
/// ready" and the caller loops.
fn poll_fds(fds: &mut [libc::pollfd], wait: Option<Duration>) -> Result<()> {
    for fd in fds.iter_mut() {
        fd.revents = 0;
    }
    let millis = match wait {
        None => -1,
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int,
    };

    // SAFETY: `fds` is an exclusively borrowed slice of initialised pollfd
    // structs and the length passed matches it.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            for fd in fds.iter_mut() {
                fd.revents = 0;
            }
            return Ok(());
        }
        return Err(TetherError::io(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionManager, Endpoint, TetherCode, transport::inproc::InprocStream};
    use std::thread;

    fn inproc_pair(capacity: usize) -> (Line, Line) {
        let (a, b) = InprocStream::pair(capacity);
        let endpoint = Endpoint::parse("inproc://poller-test").unwrap();
        (Line::new(Stream::Inproc(a), endpoint.clone()), Line::new(Stream::Inproc(b), endpoint))
    }

    fn tcp_pair(manager: &ConnectionManager) -> (Line, Line) {
        let acceptor = manager.create_server("tcp://127.0.0.1:0").unwrap();
        let client = manager.create_client(&acceptor.endpoint().to_string()).unwrap();
        let server = acceptor.wait_connection(Duration::from_secs(2)).unwrap().unwrap();
        (client, server)
    }

    #[test]
    fn idle_lines_time_out() {
        let manager = ConnectionManager::default();
        let (_tcp_client, tcp_server) = tcp_pair(&manager);
        let (_a, b) = inproc_pair(16);

        let mut poller = Poller::new();
        poller.add_line(&tcp_server, LineEvents::READ).unwrap();
        poller.add_line(&b, LineEvents::READ).unwrap();

        let start = Instant::now();
        assert!(!poller.poll(Duration::from_millis(60)).unwrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn reports_only_the_line_with_data() {
        let manager = ConnectionManager::default();
        let (mut tcp_client, mut tcp_server) = tcp_pair(&manager);
        let (_a, b) = inproc_pair(16);

        let mut poller = Poller::new();
        let tcp_key = poller.add_line(&tcp_server, LineEvents::READ).unwrap();
        let inproc_key = poller.add_line(&b, LineEvents::READ).unwrap();

        tcp_client.write_all(b"wake").unwrap();
        assert!(poller.poll(Duration::from_secs(2)).unwrap());
        assert_eq!(poller.events_for(tcp_key), LineEvents::READ);
        assert!(poller.events_for(inproc_key).is_empty());

        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            filled += tcp_server.read(&mut buf[filled..]).unwrap();
        }
        assert_eq!(&buf, b"wake");
    }

    #[test]
    fn inproc_write_wakes_unbounded_poll() {
        let (mut a, b) = inproc_pair(16);
        let mut poller = Poller::new();
        let key = poller.add_line(&b, LineEvents::READ).unwrap();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a.write_all(b"hi").unwrap();
            a
        });
        assert!(poller.poll(Duration::MAX).unwrap());
        assert_eq!(poller.events_for(key), LineEvents::READ);
        drop(writer.join().unwrap());
    }

    #[test]
    fn writable_until_the_pipe_fills() {
        let (mut a, _b) = inproc_pair(4);
        let mut poller = Poller::new();
        let key = poller.add_line(&a, LineEvents::WRITE).unwrap();

        assert!(poller.poll(Duration::ZERO).unwrap());
        assert_eq!(poller.events_for(key), LineEvents::WRITE);

        a.write_all(b"full").unwrap();
        assert!(!poller.poll(Duration::ZERO).unwrap());
        assert!(poller.events_for(key).is_empty());
    }

    #[test]
    fn hang_up_is_read_or_error_by_interest() {
        let (a, b) = inproc_pair(16);
        let mut poller = Poller::new();
        let reader = poller.add_line(&b, LineEvents::READ).unwrap();
        let writer = poller.add_line(&b, LineEvents::WRITE).unwrap();
        drop(a);

        assert!(poller.poll(Duration::from_secs(1)).unwrap());
        assert_eq!(poller.events_for(reader), LineEvents::READ);
        assert_eq!(poller.events_for(writer), LineEvents::ERROR);
    }

    #[test]
    fn removed_lines_are_forgotten() {
        let (mut a, b) = inproc_pair(16);
        let mut poller = Poller::new();
        let key = poller.add_line(&b, LineEvents::READ).unwrap();
        a.write_all(b"x").unwrap();

        assert!(poller.poll(Duration::ZERO).unwrap());
        assert!(poller.remove_line(key));
        assert!(!poller.remove_line(key));
        assert!(poller.events_for(key).is_empty());
        assert!(poller.is_empty());
        assert!(!poller.poll(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn rejects_closed_lines_and_empty_interest() {
        let (mut a, b) = inproc_pair(16);
        let mut poller = Poller::new();
        assert_eq!(poller.add_line(&b, LineEvents::empty()).unwrap_err().code, TetherCode::InvalidArgument);

        a.close();
        assert!(poller.add_line(&a, LineEvents::READ).unwrap_err().is_connection_lost());
        assert_eq!(poller.len(), 0);
    }
}

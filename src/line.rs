//! Bidirectional byte-stream handle.
//!
//! A `Line` is exclusively owned: calls take `&mut self`, so two threads can
//! only share one behind their own lock. Message ordering on the wire is the
//! order in which the owner issues `write` calls.

use std::{
    fmt,
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    Endpoint, LineIo, LineOption, LineOptions, Result, TetherError, WriteOutcome,
    transport::{Stream, deadline_after},
};

pub struct Line {
    stream: Option<Stream>,
    endpoint: Endpoint,
    options: LineOptions,
}

impl Line {
    /// Fresh lines start with default options (no timeouts).
    pub(crate) fn new(stream: Stream, endpoint: Endpoint) -> Self {
        Self { stream: Some(stream), endpoint, options: LineOptions::default() }
    }

    pub fn endpoint(&self) -> &Endpoint { &self.endpoint }
    pub fn options(&self) -> LineOptions { self.options }
    pub fn is_closed(&self) -> bool { self.stream.is_none() }

    #[cfg(unix)]
    pub(crate) fn stream_ref(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        self.stream
            .as_mut()
            .ok_or_else(|| TetherError::connection_lost().ctx("line is closed"))
    }

    /// Blocks until at least one byte arrives, the receive timeout elapses,
    /// or the connection drops. `Ok(0)` means the peer closed cleanly.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(TetherError::invalid_argument("read into an empty buffer"));
        }
        let stream = self.stream()?;
        loop {
            match stream.read(buf) {
                Ok(n) => {
                    trace!(n, "line read");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes all of `buf` unless the send timeout runs out first.
    ///
    /// The timeout bounds the whole call. If it elapses after some bytes went
    /// out the outcome is short and the caller resumes from
    /// `WriteOutcome::written`; if nothing went out it is a `Timeout` error.
    pub fn write(&mut self, buf: &[u8]) -> Result<WriteOutcome> {
        if buf.is_empty() {
            return Err(TetherError::invalid_argument("write of an empty buffer"));
        }
        let deadline = self.options.send_timeout.and_then(deadline_after);
        let stream = self.stream()?;

        let mut written = 0;
        while written < buf.len() {
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                stream.set_write_timeout(Some(left))?;
            }
            match stream.write(&buf[written..]) {
                Ok(0) => return Err(TetherError::connection_lost().ctx("peer stopped accepting bytes")),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = TetherError::io(e);
                    if err.is_timeout() {
                        break;
                    }
                    return Err(err);
                }
            }
        }

        if written == 0 {
            return Err(TetherError::timeout().ctx("no bytes accepted before send timeout"));
        }
        trace!(written, requested = buf.len(), "line write");
        Ok(WriteOutcome { written, requested: buf.len() })
    }

    /// Like `write`, but a short outcome is reported as `Timeout`.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let out = self.write(buf)?;
        if out.is_short() {
            return Err(TetherError::timeout().ctx(format_args!("sent {} of {} bytes", out.written, out.requested)));
        }
        Ok(())
    }

    /// Applies to subsequent operations only. `None` or zero blocks forever.
    pub fn set_option(&mut self, option: LineOption, value: Option<Duration>) -> Result<()> {
        let mut next = self.options;
        next.set(option, value);

        let stream = self.stream()?;
        match option {
            LineOption::ReceiveTimeout => stream.set_read_timeout(next.receive_timeout)?,
            LineOption::SendTimeout => stream.set_write_timeout(next.send_timeout)?,
        }
        self.options = next;
        Ok(())
    }

    /// Integer surface for bindings: `id` is a `LineOption` discriminant and
    /// `millis == 0` means no timeout. Unknown ids leave the line untouched.
    pub fn set_option_raw(&mut self, id: i32, millis: u64) -> Result<()> {
        let option = LineOption::try_from(id)?;
        self.set_option(option, Some(Duration::from_millis(millis)))
    }

    /// Releases the handle. Safe to call more than once; afterwards every
    /// read/write fails with `ConnectionLost`.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            debug!(endpoint = %self.endpoint, "line closed");
        }
    }
}

impl Drop for Line {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Line")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LineIo for Line {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<WriteOutcome> {
        self.write(buf)
    }
}

impl Read for Line {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Line::read(self, buf).map_err(Into::into)
    }
}

impl Write for Line {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Line::write(self, buf).map(|out| out.written).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

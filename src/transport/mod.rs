//! Per-scheme transports and the raw stream/listener handles they produce.
//!
//! Every transport hands back the same `Stream`/`SocketListener` variants so
//! `Line` and `Acceptor` can dispatch with a plain `match`.

pub mod inproc;
#[cfg(unix)]
pub mod local;
pub mod tcp;

pub use inproc::InprocTransport;
#[cfg(unix)]
pub use local::LocalTransport;
pub use tcp::TcpTransport;

use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::PathBuf;

use inproc::InprocStream;

/// `None` when `timeout` reaches past what `Instant` can represent; callers
/// treat that as "no deadline".
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Local(UnixStream),
    Inproc(InprocStream),
}

impl Stream {
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Local(s) => s.read(buf),
            Self::Inproc(s) => s.read(buf),
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Local(s) => s.write(buf),
            Self::Inproc(s) => s.write(buf),
        }
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Local(s) => s.set_read_timeout(timeout),
            Self::Inproc(s) => {
                s.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    pub(crate) fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Self::Local(s) => s.set_write_timeout(timeout),
            Self::Inproc(s) => {
                s.set_write_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Best-effort; the handle is released when `self` drops right after.
    pub(crate) fn shutdown(self) {
        match self {
            Self::Tcp(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            #[cfg(unix)]
            Self::Local(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Self::Inproc(s) => s.disconnect(),
        }
    }
}

/// Non-blocking OS listener polled by `Acceptor::wait_connection`.
pub(crate) enum SocketListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Local { listener: UnixListener, path: PathBuf },
}

impl SocketListener {
    /// `Ok(None)` when nothing is pending.
    pub(crate) fn try_accept(&self) -> io::Result<Option<Stream>> {
        let accepted = match self {
            Self::Tcp(l) => l.accept().and_then(|(s, peer)| {
                tracing::trace!(%peer, "tcp accept");
                // BSD-derived stacks let the accepted socket inherit O_NONBLOCK
                s.set_nonblocking(false)?;
                Ok(Stream::Tcp(s))
            }),
            #[cfg(unix)]
            Self::Local { listener, .. } => listener.accept().and_then(|(s, _)| {
                s.set_nonblocking(false)?;
                Ok(Stream::Local(s))
            }),
        };

        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
            ) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Releases the listening handle; local sockets also unlink their path.
    pub(crate) fn close(self) {
        match self {
            Self::Tcp(l) => drop(l),
            #[cfg(unix)]
            Self::Local { listener, path } => {
                drop(listener);
                local::release(&path);
            }
        }
    }
}

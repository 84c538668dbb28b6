use std::{
    collections::BTreeSet,
    io,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Acceptor, Endpoint, Line, Result, Scheme, TetherError, Transport};

use super::{SocketListener, Stream};

/// Socket paths this process is listening on. Checked before the liveness
/// connect so a second listen never lands in our own acceptor's backlog.
static BOUND_PATHS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

fn bound_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_owned())
}

/// `local:///path` transport over Unix domain stream sockets.
#[derive(Debug, Clone, Copy)]
pub struct LocalTransport {
    accept_poll_interval: Duration,
}

impl LocalTransport {
    pub fn new(accept_poll_interval: Duration) -> Self {
        Self { accept_poll_interval }
    }
}

impl Transport for LocalTransport {
    fn scheme(&self) -> Scheme { Scheme::Local }

    fn connect(&self, endpoint: &Endpoint) -> Result<Line> {
        let address = endpoint.address();
        let stream = UnixStream::connect(address).map_err(|e| TetherError::connect_failure(address, e))?;
        debug!(%endpoint, "local connected");
        Ok(Line::new(Stream::Local(stream), endpoint.clone()))
    }

    /// A leftover socket file nobody answers on is removed and the bind
    /// retried; a live one means the address is in use.
    ///
    /// Paths bound by this process are refused without touching the socket.
    /// For a file owned by another process the only portable liveness test
    /// is a connect, which that process will see as one short-lived client.
    fn listen(&self, endpoint: &Endpoint) -> Result<Acceptor> {
        let address = endpoint.address();
        let path = PathBuf::from(address);
        let key = bound_key(&path);

        let mut bound = BOUND_PATHS.lock();
        if bound.contains(&key) {
            return Err(TetherError::listen_failure(
                address,
                io::Error::new(io::ErrorKind::AddrInUse, "path is already listening in this process"),
            ));
        }

        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if UnixStream::connect(&path).is_ok() {
                    return Err(TetherError::listen_failure(address, e));
                }
                debug!(path = %path.display(), "removing stale socket file");
                std::fs::remove_file(&path).map_err(|e| TetherError::listen_failure(address, e))?;
                UnixListener::bind(&path).map_err(|e| TetherError::listen_failure(address, e))?
            }
            Err(e) => return Err(TetherError::listen_failure(address, e)),
        };
        if let Err(e) = listener.set_nonblocking(true) {
            drop(listener);
            unlink(&path);
            return Err(TetherError::listen_failure(address, e));
        }
        bound.insert(key);
        drop(bound);

        debug!(%endpoint, "local listening");
        Ok(Acceptor::from_socket(
            endpoint.clone(),
            SocketListener::Local { listener, path },
            self.accept_poll_interval,
        ))
    }
}

/// Forgets `path` as bound by this process and removes the socket file.
pub(crate) fn release(path: &Path) {
    BOUND_PATHS.lock().remove(&bound_key(path));
    unlink(path);
}

fn unlink(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to unlink socket file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TetherCode;

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        // bound then dropped without unlinking leaves the file behind
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let endpoint = Endpoint::parse(&format!("local://{}", path.display())).unwrap();
        let transport = LocalTransport::new(Duration::from_millis(5));
        let acceptor = transport.listen(&endpoint).expect("stale file should be reclaimed");

        let err = transport.listen(&endpoint).unwrap_err();
        assert_eq!(err.code, TetherCode::ListenFailure);

        acceptor.close();
        assert!(!path.exists());
    }

    #[test]
    fn refused_second_listen_leaves_no_connection_behind() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::parse(&format!("local://{}", dir.path().join("busy.sock").display())).unwrap();
        let transport = LocalTransport::new(Duration::from_millis(5));

        let first = transport.listen(&endpoint).unwrap();
        assert_eq!(transport.listen(&endpoint).unwrap_err().code, TetherCode::ListenFailure);
        assert!(first.wait_connection(Duration::from_millis(100)).unwrap().is_none());

        // once released the path can be bound again
        first.close();
        let again = transport.listen(&endpoint).unwrap();
        again.close();
    }

    #[test]
    fn connect_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::parse(&format!("local://{}", dir.path().join("none.sock").display())).unwrap();
        let err = LocalTransport::new(Duration::from_millis(5)).connect(&endpoint).unwrap_err();
        assert_eq!(err.code, TetherCode::ConnectFailure);
    }
}

use std::{
    io,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::{debug, trace};

use crate::{Acceptor, Endpoint, Line, Result, Scheme, TetherError, Transport};

use super::{SocketListener, Stream};

/// `tcp://host:port` transport over the platform stream sockets.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    accept_poll_interval: Duration,
}

impl TcpTransport {
    pub fn new(accept_poll_interval: Duration) -> Self {
        Self { accept_poll_interval }
    }
}

impl Transport for TcpTransport {
    fn scheme(&self) -> Scheme { Scheme::Tcp }

    /// Tries every address `host:port` resolves to, in order.
    fn connect(&self, endpoint: &Endpoint) -> Result<Line> {
        let address = endpoint.address();
        let candidates = address
            .to_socket_addrs()
            .map_err(|e| TetherError::connect_failure(address, e))?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect(candidate) {
                Ok(stream) => {
                    debug!(%endpoint, peer = %candidate, "tcp connected");
                    return Ok(Line::new(Stream::Tcp(stream), endpoint.clone()));
                }
                Err(e) => {
                    trace!(peer = %candidate, error = %e, "tcp connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing"));
        Err(TetherError::connect_failure(address, err))
    }

    fn listen(&self, endpoint: &Endpoint) -> Result<Acceptor> {
        let address = endpoint.address();
        let listener = TcpListener::bind(address).map_err(|e| TetherError::listen_failure(address, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TetherError::listen_failure(address, e))?;

        // report the bound port when the caller asked for port 0
        let bound = match listener.local_addr() {
            Ok(addr) => Endpoint::new(Scheme::Tcp, addr.to_string()),
            Err(_) => endpoint.clone(),
        };
        debug!(endpoint = %bound, "tcp listening");
        Ok(Acceptor::from_socket(bound, SocketListener::Tcp(listener), self.accept_poll_interval))
    }
}

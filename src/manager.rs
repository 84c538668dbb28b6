//! Process-wide line manager: resolves endpoints and dispatches to the
//! transport registered for their scheme.

use std::{collections::HashMap, sync::OnceLock};

use tracing::debug;

use crate::{
    Acceptor, Endpoint, Line, ManagerConfig, Result, Scheme, TetherError, Transport,
    transport::{InprocTransport, TcpTransport},
};

#[cfg(unix)]
use crate::transport::LocalTransport;

pub struct ConnectionManager {
    config: ManagerConfig,
    transports: HashMap<Scheme, Box<dyn Transport>>,
}

impl ConnectionManager {
    /// Registers every transport this platform supports.
    pub fn new(config: ManagerConfig) -> Self {
        let mut manager = Self { config, transports: HashMap::new() };
        manager.register(Box::new(TcpTransport::new(config.accept_poll_interval)));
        manager.register(Box::new(InprocTransport::new(config.inproc_buffer_size)));
        #[cfg(unix)]
        manager.register(Box::new(LocalTransport::new(config.accept_poll_interval)));
        manager
    }

    /// The lazily created process-wide manager, built from
    /// `ManagerConfig::default()` on first use. It lives until process exit.
    pub fn global() -> &'static ConnectionManager {
        static GLOBAL: OnceLock<ConnectionManager> = OnceLock::new();
        GLOBAL.get_or_init(|| ConnectionManager::new(ManagerConfig::default()))
    }

    fn register(&mut self, transport: Box<dyn Transport>) {
        debug!(scheme = %transport.scheme(), "registering transport");
        self.transports.insert(transport.scheme(), transport);
    }

    pub fn config(&self) -> &ManagerConfig { &self.config }

    pub fn supports(&self, scheme: Scheme) -> bool {
        self.transports.contains_key(&scheme)
    }

    fn transport(&self, endpoint: &Endpoint) -> Result<&dyn Transport> {
        self.transports
            .get(&endpoint.scheme())
            .map(|t| t.as_ref())
            .ok_or_else(|| {
                TetherError::resolve(&endpoint.to_string())
                    .ctx(format_args!("no transport for scheme '{}' on this platform", endpoint.scheme()))
            })
    }

    /// Parses `uri` and dials it. Resolution errors come back before any I/O.
    pub fn create_client(&self, uri: &str) -> Result<Line> {
        self.connect(&Endpoint::parse(uri)?)
    }

    /// Parses `uri` and starts listening on it.
    pub fn create_server(&self, uri: &str) -> Result<Acceptor> {
        self.listen(&Endpoint::parse(uri)?)
    }

    pub fn connect(&self, endpoint: &Endpoint) -> Result<Line> {
        self.transport(endpoint)?.connect(endpoint)
    }

    pub fn listen(&self, endpoint: &Endpoint) -> Result<Acceptor> {
        self.transport(endpoint)?.listen(endpoint)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

/// `ConnectionManager::global().create_client(uri)`.
pub fn create_client(uri: &str) -> Result<Line> {
    ConnectionManager::global().create_client(uri)
}

/// `ConnectionManager::global().create_server(uri)`.
pub fn create_server(uri: &str) -> Result<Acceptor> {
    ConnectionManager::global().create_server(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TetherCode;
    use std::time::Duration;

    #[test]
    fn unknown_scheme_fails_before_io() {
        let manager = ConnectionManager::default();
        assert_eq!(manager.create_client("carrier-pigeon://coop").unwrap_err().code, TetherCode::Resolve);
        assert_eq!(manager.create_server("nope").unwrap_err().code, TetherCode::Resolve);
    }

    #[test]
    fn inproc_dial_without_listener_fails() {
        let manager = ConnectionManager::default();
        let err = manager.create_client("inproc://nobody-home").unwrap_err();
        assert_eq!(err.code, TetherCode::ConnectFailure);
    }

    #[test]
    fn inproc_address_in_use_until_closed() {
        let manager = ConnectionManager::default();
        let acceptor = manager.create_server("inproc://taken").unwrap();
        assert_eq!(manager.create_server("inproc://taken").unwrap_err().code, TetherCode::ListenFailure);

        acceptor.close();
        let again = manager.create_server("inproc://taken").expect("address freed on close");
        drop(again);
    }

    #[test]
    fn inproc_dial_after_close_fails() {
        let manager = ConnectionManager::default();
        let acceptor = manager.create_server("inproc://gone").unwrap();
        drop(acceptor);
        assert_eq!(manager.create_client("inproc://gone").unwrap_err().code, TetherCode::ConnectFailure);
    }

    #[test]
    fn managers_do_not_share_inproc_registries() {
        let a = ConnectionManager::default();
        let b = ConnectionManager::default();
        let acceptor = a.create_server("inproc://private").unwrap();
        assert!(b.create_client("inproc://private").is_err());

        let mut line = a.create_client("inproc://private").unwrap();
        let mut accepted = acceptor.wait_connection(Duration::from_millis(100)).unwrap().unwrap();
        line.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(accepted.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn global_is_a_singleton() {
        assert!(std::ptr::eq(ConnectionManager::global(), ConnectionManager::global()));
        assert!(ConnectionManager::global().supports(Scheme::Inproc));
    }
}

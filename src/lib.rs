//! # TETHER
//! Transport-agnostic lines and length-framed multi-part messages.
//!
//! One API opens byte-stream connections over TCP (`tcp://host:port`),
//! Unix domain sockets (`local:///path`) and in-process pipes
//! (`inproc://name`). On top of those raw streams, [`MessageProtocol`]
//! carries [`Message`]s made of ordered opaque frames.
//!
//! ## Shape
//! * **Endpoints** are parsed once and dispatched by scheme through a
//!   [`ConnectionManager`]; unknown schemes fail before any I/O.
//! * **Lines** block; each is configured with its own receive/send timeout
//!   and owned by a single thread at a time.
//! * **Acceptors** hand out lines with a bounded wait and can be closed from
//!   another thread to release a blocked waiter.
//! * **Pollers** (Unix) watch many lines at once for read/write readiness.
//! * **Errors** come from a small closed set of [`TetherCode`]s, so callers
//!   can branch on `Timeout` vs `ConnectionLost` without parsing messages.
//!
//! ```no_run
//! use std::time::Duration;
//! use tether::{Message, MessageProtocol};
//!
//! let acceptor = tether::create_server("inproc://jobs")?;
//! let mut client = tether::create_client("inproc://jobs")?;
//! let mut server = acceptor.wait_connection(Duration::from_secs(1))?.expect("pending dial");
//!
//! let msg: Message = ["a", "bb", "ccc"].into_iter().collect();
//! MessageProtocol::new(&mut client).send(&msg)?;
//!
//! let mut got = Message::new();
//! MessageProtocol::new(&mut server).read(&mut got)?;
//! assert_eq!(got, msg);
//! # Ok::<(), tether::TetherError>(())
//! ```


pub mod acceptor;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod line;
pub mod manager;
pub mod message;
#[cfg(unix)]
pub mod poller;
pub mod traits;
pub mod transport;
pub mod types;

pub use acceptor::Acceptor;
pub use endpoint::{Endpoint, Scheme};
pub use error::*;
pub use frame::MessageProtocol;
pub use line::Line;
pub use manager::{ConnectionManager, create_client, create_server};
pub use message::Message;
#[cfg(unix)]
pub use poller::{LineEvents, PollKey, Poller};
pub use traits::*;
pub use types::*;

use crate::{Acceptor, Endpoint, Line, Message, Result, Scheme, WriteOutcome};

/// One scheme's connect/listen implementation. Registered once per
/// `ConnectionManager`; never removed.
pub trait Transport: Send + Sync {
    fn scheme(&self) -> Scheme;
    fn connect(&self, endpoint: &Endpoint) -> Result<Line>;
    fn listen(&self, endpoint: &Endpoint) -> Result<Acceptor>;
}

/// Blocking byte I/O with `Line` semantics: `0` from `read_some` is a clean
/// remote close, and a short `write_some` means the send timeout elapsed.
pub trait LineIo {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_some(&mut self, buf: &[u8]) -> Result<WriteOutcome>;
}

impl<T: LineIo + ?Sized> LineIo for &mut T {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_some(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<WriteOutcome> {
        (**self).write_some(buf)
    }
}

pub trait MessageSink {
    type Error;
    fn send_message(&mut self, message: &Message) -> Result<(), Self::Error>;
}

pub trait MessageSource {
    type Error;
    /// Returns `false` when the peer closed cleanly between messages.
    fn recv_message(&mut self, message: &mut Message) -> Result<bool, Self::Error>;
}

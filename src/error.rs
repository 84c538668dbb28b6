use std::{fmt, io};


use liaise::{Liaise, RegisterErrors};

/// Stable error identities surfaced to callers.
///
/// Bindings branch on these (e.g. "retry only on `Timeout`"), so the numeric
/// ids must never be reused.
#[derive(RegisterErrors, Debug, Copy, Clone, PartialEq, Eq)]
#[error_prefix = "TETH"]
pub enum TetherCode {
    Io = 1,
    Timeout = 2,
    ConnectionLost = 3,
    BufferTooBig = 4,
    ConnectFailure = 5,
    ListenFailure = 6,
    UnknownOption = 7,
    InvalidArgument = 8,
    Resolve = 9,
    Truncated = 10,
    #[cfg(feature = "postcard")]
    PostcardEncode = 20,
    #[cfg(feature = "postcard")]
    PostcardDecode = 21,
    #[cfg(feature = "cbor")]
    CborEncode = 22,
    #[cfg(feature = "cbor")]
    CborDecode = 23,
}

impl Liaise for TetherCode {
    fn code_id(self) -> u16 { self as u16 }

    fn message(self) -> &'static str {
        match self {
            Self::Io => "I/O error",
            Self::Timeout => "Operation timed out",
            Self::ConnectionLost => "Connection lost",
            Self::BufferTooBig => "Buffer too big",
            Self::ConnectFailure => "Connect failed",
            Self::ListenFailure => "Listen failed",
            Self::UnknownOption => "Unknown line option",
            Self::InvalidArgument => "Invalid argument",
            Self::Resolve => "Endpoint resolution failed",
            Self::Truncated => "Message truncated",
            #[cfg(feature = "postcard")]
            Self::PostcardEncode => "Postcard encode failed",
            #[cfg(feature = "postcard")]
            Self::PostcardDecode => "Postcard decode failed",
            #[cfg(feature = "cbor")]
            Self::CborEncode => "CBOR encode failed",
            #[cfg(feature = "cbor")]
            Self::CborDecode => "CBOR decode failed",
        }
    }
}

/// Concrete runtime error type for the crate.
/// Uses `liaise` for stable IDs + formatting; no `thiserror`.
#[derive(Debug)]
pub struct TetherError {
    pub code: TetherCode,
    pub ctx: Option<String>,
    pub source: Option<TetherSource>,
}

#[derive(Debug)]
pub enum TetherSource {
    Io(io::Error),
    #[cfg(feature = "postcard")]
    Postcard(postcard::Error),
    #[cfg(feature = "cbor")]
    Cbor(serde_cbor::Error),
}

pub type Result<T, E = TetherError> = std::result::Result<T, E>;

impl TetherError {
    #[inline]
    pub fn new(code: TetherCode) -> Self {
        Self { code, ctx: None, source: None }
    }

    #[inline]
    pub fn ctx(mut self, ctx: impl fmt::Display) -> Self {
        self.ctx = Some(ctx.to_string());
        self
    }

    /// Wraps a platform error, classifying it into the closed set of codes.
    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self {
            code: classify(&err),
            ctx: Some(err.to_string()),
            source: Some(TetherSource::Io(err)),
        }
    }

    #[inline]
    pub fn timeout() -> Self {
        Self::new(TetherCode::Timeout)
    }

    #[inline]
    pub fn connection_lost() -> Self {
        Self::new(TetherCode::ConnectionLost)
    }

    #[inline]
    pub fn buffer_too_big(len: usize, max: usize) -> Self {
        Self::new(TetherCode::BufferTooBig).ctx(format_args!("len {len} exceeds max {max}"))
    }

    #[inline]
    pub fn invalid_argument(what: impl fmt::Display) -> Self {
        Self::new(TetherCode::InvalidArgument).ctx(what)
    }

    #[inline]
    pub fn unknown_option(id: i32) -> Self {
        Self::new(TetherCode::UnknownOption).ctx(format_args!("option id {id}"))
    }

    #[inline]
    pub fn resolve(uri: &str) -> Self {
        Self::new(TetherCode::Resolve).ctx(format_args!("'{uri}'"))
    }

    #[inline]
    pub fn truncated(got: usize, expected: usize) -> Self {
        Self::new(TetherCode::Truncated).ctx(format_args!("got {got} of {expected} bytes"))
    }

    /// Re-tags an error produced while dialing as a connect failure.
    pub fn connect_failure(address: &str, err: io::Error) -> Self {
        Self {
            code: TetherCode::ConnectFailure,
            ctx: Some(format!("{address}: {err}")),
            source: Some(TetherSource::Io(err)),
        }
    }

    /// Re-tags an error produced while binding as a listen failure.
    pub fn listen_failure(address: &str, err: io::Error) -> Self {
        Self {
            code: TetherCode::ListenFailure,
            ctx: Some(format!("{address}: {err}")),
            source: Some(TetherSource::Io(err)),
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.code == TetherCode::Timeout
    }

    #[inline]
    pub fn is_connection_lost(&self) -> bool {
        self.code == TetherCode::ConnectionLost
    }

    #[cfg(feature = "postcard")]
    #[inline]
    pub fn postcard_encode(err: postcard::Error) -> Self {
        Self {
            code: TetherCode::PostcardEncode,
            ctx: Some(err.to_string()),
            source: Some(TetherSource::Postcard(err)),
        }
    }

    #[cfg(feature = "postcard")]
    #[inline]
    pub fn postcard_decode(err: postcard::Error) -> Self {
        Self {
            code: TetherCode::PostcardDecode,
            ctx: Some(err.to_string()),
            source: Some(TetherSource::Postcard(err)),
        }
    }

    #[cfg(feature = "cbor")]
    #[inline]
    pub fn cbor_encode(err: serde_cbor::Error) -> Self {
        Self {
            code: TetherCode::CborEncode,
            ctx: Some(err.to_string()),
            source: Some(TetherSource::Cbor(err)),
        }
    }

    #[cfg(feature = "cbor")]
    #[inline]
    pub fn cbor_decode(err: serde_cbor::Error) -> Self {
        Self {
            code: TetherCode::CborDecode,
            ctx: Some(err.to_string()),
            source: Some(TetherSource::Cbor(err)),
        }
    }
}

fn classify(err: &io::Error) -> TetherCode {
    use io::ErrorKind::*;
    match err.kind() {
        TimedOut | WouldBlock => TetherCode::Timeout,
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof => {
            TetherCode::ConnectionLost
        }
        _ => TetherCode::Io,
    }
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // "[TETH0002] Operation timed out: ..."
        let base = self.code.render();
        match &self.ctx {
            Some(ctx) => write!(f, "{base}: {ctx}"),
            None => write!(f, "{base}"),
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(TetherSource::Io(e)) => Some(e),
            #[cfg(feature = "postcard")]
            Some(TetherSource::Postcard(e)) => Some(e),
            #[cfg(feature = "cbor")]
            Some(TetherSource::Cbor(e)) => Some(e),
            None => None,
        }
    }
}

impl From<io::Error> for TetherError {
    #[inline]
    fn from(e: io::Error) -> Self {
        TetherError::io(e)
    }
}

impl From<TetherError> for io::Error {
    fn from(e: TetherError) -> Self {
        let kind = match e.code {
            TetherCode::Timeout => io::ErrorKind::TimedOut,
            TetherCode::ConnectionLost => io::ErrorKind::ConnectionReset,
            TetherCode::InvalidArgument | TetherCode::UnknownOption => io::ErrorKind::InvalidInput,
            TetherCode::Truncated => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

//! `scheme://address` endpoint parsing.

use std::{fmt, str::FromStr};

use crate::{Result, TetherError};

const SEPARATOR: &str = "://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Inproc,
    Local,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Inproc => "inproc",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "inproc" => Ok(Self::Inproc),
            "local" => Ok(Self::Local),
            other => Err(TetherError::resolve(other).ctx(format_args!("unknown scheme '{other}'"))),
        }
    }
}

/// A parsed endpoint. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    address: String,
}

impl Endpoint {
    pub fn new(scheme: Scheme, address: impl Into<String>) -> Self {
        Self { scheme, address: address.into() }
    }

    /// Splits `uri` at the first `://`. Pure; never touches the network.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, address) = uri
            .split_once(SEPARATOR)
            .ok_or_else(|| TetherError::resolve(uri).ctx(format_args!("'{uri}' has no scheme")))?;

        let scheme: Scheme = scheme.parse()?;
        if address.is_empty() {
            return Err(TetherError::resolve(uri).ctx(format_args!("'{uri}' has an empty address")));
        }

        Ok(Self { scheme, address: address.to_owned() })
    }

    pub fn scheme(&self) -> Scheme { self.scheme }
    pub fn address(&self) -> &str { &self.address }
}

impl FromStr for Endpoint {
    type Err = TetherError;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.scheme, self.address)
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TetherError;

/// Per-line option identifiers. The discriminants are the integer ids a
/// binding passes through `Line::set_option_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LineOption {
    ReceiveTimeout = 1,
    SendTimeout = 2,
}

impl TryFrom<i32> for LineOption {
    type Error = TetherError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Self::ReceiveTimeout),
            2 => Ok(Self::SendTimeout),
            other => Err(TetherError::unknown_option(other)),
        }
    }
}

/// Mutable option set carried by every `Line`.
///
/// `None` blocks indefinitely. A zero duration is normalised to `None`
/// since the platform socket layer rejects it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineOptions {
    pub receive_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
}

impl LineOptions {
    pub fn set(&mut self, option: LineOption, value: Option<Duration>) {
        let value = value.filter(|d| !d.is_zero());
        match option {
            LineOption::ReceiveTimeout => self.receive_timeout = value,
            LineOption::SendTimeout => self.send_timeout = value,
        }
    }

    pub fn get(&self, option: LineOption) -> Option<Duration> {
        match option {
            LineOption::ReceiveTimeout => self.receive_timeout,
            LineOption::SendTimeout => self.send_timeout,
        }
    }
}

/// Limits applied by the message protocol when reading from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_len: usize,

    /// Largest frame count accepted or sent per message.
    pub max_frames: usize,

    /// If the peer claims an oversize frame, drain the rest of the message
    /// only if every declared length is <= drain_oversize_up_to.
    /// 0 = never drain oversize (recommended default).
    pub drain_oversize_up_to: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 16 * 1024 * 1024,
            max_frames: 64 * 1024,
            drain_oversize_up_to: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of each direction of an in-process pipe.
    pub inproc_buffer_size: usize,

    /// How often a socket acceptor re-checks for a pending connection.
    pub accept_poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            inproc_buffer_size: 64 * 1024,
            accept_poll_interval: Duration::from_millis(5),
        }
    }
}

/// Result of a `Line::write`: how much of the buffer actually went out.
///
/// A short outcome means the send timeout elapsed after some bytes were
/// accepted; the caller resumes from `written`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub requested: usize,
}

impl WriteOutcome {
    #[inline]
    pub fn is_short(&self) -> bool {
        self.written < self.requested
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.requested - self.written
    }
}

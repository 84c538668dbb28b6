//! Message framing over byte-stream lines.
//!
//! Format: `<u32_le frame_count>` then per frame `<u32_le len><frame_bytes...>`.
//! This is the interoperability contract; every prefix is little-endian.

use crate::{
    Line, LineIo, Message, MessageSink, MessageSource, ProtocolConfig, Result, TetherError,
};

use tracing::trace;

/// Number of bytes used for each count/length prefix.
pub const LEN_PREFIX: usize = 4;

const DRAIN_CHUNK: usize = 8 * 1024;

enum Fill {
    Done,
    /// Peer closed before the first byte of a message.
    Eof,
}

/// Reads and writes whole `Message`s on one bound line.
///
/// The protocol borrows or owns its line through `L`; dropping the protocol
/// never closes a borrowed line.
#[derive(Debug)]
pub struct MessageProtocol<L: LineIo = Line> {
    line: L,
    cfg: ProtocolConfig,
    buf: Vec<u8>,
}

impl<L: LineIo> MessageProtocol<L> {
    pub fn new(line: L) -> Self { Self::with_config(line, ProtocolConfig::default()) }
    pub fn with_config(line: L, cfg: ProtocolConfig) -> Self { Self { line, cfg, buf: Vec::new() } }

    pub fn into_inner(self) -> L { self.line }
    pub fn inner_mut(&mut self) -> &mut L { &mut self.line }
    pub fn config(&self) -> ProtocolConfig { self.cfg }

    fn check_outgoing(&self, message: &Message) -> Result<()> {
        if message.len() > self.cfg.max_frames {
            return Err(TetherError::buffer_too_big(message.len(), self.cfg.max_frames)
                .ctx(format_args!("{} frames exceeds max {}", message.len(), self.cfg.max_frames)));
        }
        if let Some(frame) = message.iter().find(|f| f.len() > self.cfg.max_frame_len) {
            return Err(TetherError::buffer_too_big(frame.len(), self.cfg.max_frame_len));
        }
        Ok(())
    }

    /// Sends `message` as one unit. Limits are checked before any byte is
    /// written; a send timeout that leaves the message half-written is an
    /// error, never success.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.check_outgoing(message)?;

        self.buf.clear();
        message.encode_into(&mut self.buf)?;

        let out = self.line.write_some(&self.buf)?;
        if out.is_short() {
            return Err(TetherError::timeout()
                .ctx(format_args!("message cut after {} of {} bytes", out.written, out.requested)));
        }
        trace!(frames = message.len(), bytes = out.written, "message sent");
        Ok(())
    }

    /// Reads exactly one message into `message`, replacing its contents.
    ///
    /// `Ok(false)`: the peer closed cleanly between messages.
    /// A timeout before the first byte leaves the line aligned for a retry;
    /// any error after that discards what was read and the line should be
    /// treated as out of sync unless the oversize drain kept it aligned.
    pub fn read(&mut self, message: &mut Message) -> Result<bool> {
        message.clear();
        let res = self.read_message(message);
        if !matches!(res, Ok(true)) {
            message.clear();
        }
        res
    }

    fn read_message(&mut self, message: &mut Message) -> Result<bool> {
        let mut head = [0u8; LEN_PREFIX];
        if let Fill::Eof = self.fill(&mut head, true)? {
            return Ok(false);
        }
        let count = u32::from_le_bytes(head) as usize;
        if count > self.cfg.max_frames {
            return Err(TetherError::buffer_too_big(count, self.cfg.max_frames)
                .ctx(format_args!("peer declared {count} frames")));
        }

        message.reserve(count);
        for index in 0..count {
            self.fill(&mut head, false)?;
            let len = u32::from_le_bytes(head) as usize;

            if len > self.cfg.max_frame_len {
                let max = self.cfg.max_frame_len;
                let drainable = self.cfg.drain_oversize_up_to != 0 && len <= self.cfg.drain_oversize_up_to;
                if drainable && self.drain_rest(len, count - index - 1)? {
                    return Err(TetherError::buffer_too_big(len, max)
                        .ctx(format_args!("frame of {len} bytes exceeds max {max}; message drained, line aligned")));
                }
                return Err(TetherError::buffer_too_big(len, max)
                    .ctx(format_args!("frame of {len} bytes exceeds max {max}; framing lost")));
            }

            let mut frame = vec![0u8; len];
            self.fill(&mut frame, false)?;
            message.push_frame(frame);
        }

        trace!(frames = count, "message read");
        Ok(true)
    }

    /// Reads until `dst` is full, looping over short reads.
    fn fill(&mut self, dst: &mut [u8], at_boundary: bool) -> Result<Fill> {
        let mut got = 0;
        while got < dst.len() {
            match self.line.read_some(&mut dst[got..]) {
                Ok(0) if at_boundary && got == 0 => return Ok(Fill::Eof),
                Ok(0) => return Err(TetherError::truncated(got, dst.len())),
                Ok(n) => got += n,
                Err(e) if e.is_timeout() && !(at_boundary && got == 0) => {
                    return Err(e.ctx("timed out mid-message; framing lost"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Fill::Done)
    }

    fn discard(&mut self, mut len: usize) -> Result<()> {
        let mut sink = [0u8; DRAIN_CHUNK];
        while len > 0 {
            let take = len.min(DRAIN_CHUNK);
            self.fill(&mut sink[..take], false)?;
            len -= take;
        }
        Ok(())
    }

    /// Skips the oversize frame and every frame after it so the next read
    /// starts on a message boundary. `Ok(false)` when it gave up on a frame
    /// that is itself over the drain limit; the line is then out of sync.
    fn drain_rest(&mut self, len: usize, remaining: usize) -> Result<bool> {
        self.discard(len)?;
        let mut head = [0u8; LEN_PREFIX];
        for _ in 0..remaining {
            self.fill(&mut head, false)?;
            let next = u32::from_le_bytes(head) as usize;
            if next > self.cfg.drain_oversize_up_to {
                return Ok(false);
            }
            self.discard(next)?;
        }
        trace!(len, remaining, "drained oversize message");
        Ok(true)
    }
}

impl<L: LineIo> MessageSink for MessageProtocol<L> {
    type Error = TetherError;
    fn send_message(&mut self, message: &Message) -> Result<(), Self::Error> {
        self.send(message)
    }
}

impl<L: LineIo> MessageSource for MessageProtocol<L> {
    type Error = TetherError;
    fn recv_message(&mut self, message: &mut Message) -> Result<bool, Self::Error> {
        self.read(message)
    }
}

pub mod cbor;
pub mod postcard;

#[cfg(test)]
pub(crate) mod testing {
    use crate::{LineIo, Result, TetherError, WriteOutcome};
    use std::collections::VecDeque;

    /// In-memory line that hands out at most `chunk` bytes per read and
    /// accepts at most `write_budget` bytes before timing out.
    pub struct ScriptedLine {
        pub input: VecDeque<u8>,
        pub output: Vec<u8>,
        pub chunk: usize,
        pub write_budget: usize,
        pub timeout_when_empty: bool,
    }

    impl ScriptedLine {
        pub fn new(input: Vec<u8>, chunk: usize) -> Self {
            Self { input: input.into(), output: Vec::new(), chunk, write_budget: usize::MAX, timeout_when_empty: false }
        }
    }

    impl LineIo for ScriptedLine {
        fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.input.is_empty() && self.timeout_when_empty {
                return Err(TetherError::timeout());
            }
            let n = buf.len().min(self.chunk).min(self.input.len());
            for (d, s) in buf.iter_mut().zip(self.input.drain(..n)) {
                *d = s;
            }
            Ok(n)
        }

        fn write_some(&mut self, buf: &[u8]) -> Result<WriteOutcome> {
            let n = buf.len().min(self.write_budget);
            if n == 0 {
                return Err(TetherError::timeout());
            }
            self.write_budget -= n;
            self.output.extend_from_slice(&buf[..n]);
            Ok(WriteOutcome { written: n, requested: buf.len() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLine;
    use super::*;
    use crate::{ProtocolConfig, TetherCode};

    fn wire(msgs: &[Message]) -> Vec<u8> {
        let mut out = Vec::new();
        for m in msgs {
            m.encode_into(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn reassembles_across_one_byte_reads() {
        let sent: Message = ["a", "bb", "ccc"].into_iter().collect();
        let mut proto = MessageProtocol::new(ScriptedLine::new(wire(&[sent.clone()]), 1));

        let mut got = Message::new();
        assert!(proto.read(&mut got).unwrap());
        assert_eq!(got, sent);
        assert!(!proto.read(&mut got).unwrap(), "clean close at boundary");
        assert!(got.is_empty());
    }

    #[test]
    fn read_overwrites_previous_contents() {
        let mut proto = MessageProtocol::new(ScriptedLine::new(wire(&[["new"].into_iter().collect()]), 64));
        let mut got: Message = ["old", "stale"].into_iter().collect();
        proto.read(&mut got).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got.get_frame(0), b"new");
    }

    #[test]
    fn eof_mid_message_is_truncated() {
        let mut bytes = wire(&[["abcdef"].into_iter().collect()]);
        bytes.truncate(bytes.len() - 2);
        let mut proto = MessageProtocol::new(ScriptedLine::new(bytes, 64));

        let mut got = Message::new();
        assert_eq!(proto.read(&mut got).unwrap_err().code, TetherCode::Truncated);
        assert!(got.is_empty(), "partial frames are discarded");
    }

    #[test]
    fn idle_timeout_is_distinct_from_close() {
        let mut line = ScriptedLine::new(Vec::new(), 64);
        line.timeout_when_empty = true;
        let mut proto = MessageProtocol::new(line);

        let err = proto.read(&mut Message::new()).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn oversize_frame_rejected_on_read() {
        let bytes = wire(&[[vec![0u8; 100]].into_iter().collect()]);
        let cfg = ProtocolConfig { max_frame_len: 50, ..Default::default() };
        let mut proto = MessageProtocol::with_config(ScriptedLine::new(bytes, 64), cfg);

        let err = proto.read(&mut Message::new()).unwrap_err();
        assert_eq!(err.code, TetherCode::BufferTooBig);
    }

    #[test]
    fn oversize_is_drained_when_allowed() {
        let big: Message = [vec![1u8; 100], vec![2u8; 10]].into_iter().collect();
        let next: Message = ["next"].into_iter().collect();
        let cfg = ProtocolConfig { max_frame_len: 50, drain_oversize_up_to: 1024, ..Default::default() };
        let mut proto = MessageProtocol::with_config(ScriptedLine::new(wire(&[big, next.clone()]), 7), cfg);

        let mut got = Message::new();
        let err = proto.read(&mut got).unwrap_err();
        assert_eq!(err.code, TetherCode::BufferTooBig);
        assert!(err.ctx.as_deref().unwrap().contains("line aligned"));
        assert!(proto.read(&mut got).unwrap(), "stream stayed aligned");
        assert_eq!(got, next);
    }

    #[test]
    fn abandoned_drain_reports_framing_lost() {
        let big: Message = [vec![1u8; 100], vec![2u8; 2000]].into_iter().collect();
        let cfg = ProtocolConfig { max_frame_len: 50, drain_oversize_up_to: 1024, ..Default::default() };
        let mut proto = MessageProtocol::with_config(ScriptedLine::new(wire(&[big]), 64), cfg);

        let err = proto.read(&mut Message::new()).unwrap_err();
        assert_eq!(err.code, TetherCode::BufferTooBig);
        assert!(err.ctx.as_deref().unwrap().contains("framing lost"));
    }

    #[test]
    fn too_many_frames_rejected() {
        let bytes = wire(&[["a", "b", "c"].into_iter().collect()]);
        let cfg = ProtocolConfig { max_frames: 2, ..Default::default() };
        let mut proto = MessageProtocol::with_config(ScriptedLine::new(bytes, 64), cfg);
        assert_eq!(proto.read(&mut Message::new()).unwrap_err().code, TetherCode::BufferTooBig);
    }

    #[test]
    fn send_rejects_oversize_without_writing() {
        let cfg = ProtocolConfig { max_frame_len: 8, ..Default::default() };
        let mut proto = MessageProtocol::with_config(ScriptedLine::new(Vec::new(), 64), cfg);

        let msg: Message = ["ok", "this frame is too long"].into_iter().collect();
        assert_eq!(proto.send(&msg).unwrap_err().code, TetherCode::BufferTooBig);
        assert!(proto.inner_mut().output.is_empty());
    }

    #[test]
    fn short_send_is_an_error() {
        let mut line = ScriptedLine::new(Vec::new(), 64);
        line.write_budget = 5;
        let mut proto = MessageProtocol::new(line);

        let msg: Message = ["0123456789"].into_iter().collect();
        assert!(proto.send(&msg).unwrap_err().is_timeout());
    }

    #[test]
    fn empty_message_round_trips() {
        let mut proto = MessageProtocol::new(ScriptedLine::new(Vec::new(), 64));
        proto.send(&Message::new()).unwrap();
        let bytes = std::mem::take(&mut proto.inner_mut().output);
        assert_eq!(bytes, [0, 0, 0, 0]);

        let mut reader = MessageProtocol::new(ScriptedLine::new(bytes, 64));
        let mut got: Message = ["junk"].into_iter().collect();
        assert!(reader.read(&mut got).unwrap());
        assert!(got.is_empty());
    }
}

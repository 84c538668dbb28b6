//! Ordered multi-frame message container.
//!
//! Frame order is wire order. Typed helpers encode integers little-endian,
//! matching the framing prefixes.

use std::ops::Index;

use crate::{ProtocolConfig, Result, TetherError, frame::LEN_PREFIX};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Vec<u8>>,
}

impl Message {
    pub fn new() -> Self { Self::default() }

    /// Copies `bytes` into a new trailing frame.
    pub fn add_frame(&mut self, bytes: impl AsRef<[u8]>) {
        self.frames.push(bytes.as_ref().to_vec());
    }

    /// Appends an owned frame without copying.
    pub fn push_frame(&mut self, frame: Vec<u8>) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize { self.frames.len() }
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// # Panics
    /// If `index >= self.len()`.
    pub fn get_frame(&self, index: usize) -> &[u8] {
        match self.frames.get(index) {
            Some(frame) => frame,
            None => panic!("frame index {index} out of range for message of {} frames", self.frames.len()),
        }
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u8]> {
        self.frames.iter().map(Vec::as_slice)
    }

    /// Drops all frames, keeping the allocation.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.frames.reserve(additional);
    }

    pub fn add_u8(&mut self, value: u8) { self.push_frame(vec![value]); }
    pub fn add_u16(&mut self, value: u16) { self.push_frame(value.to_le_bytes().to_vec()); }
    pub fn add_u32(&mut self, value: u32) { self.push_frame(value.to_le_bytes().to_vec()); }
    pub fn add_str(&mut self, value: &str) { self.add_frame(value); }

    fn fixed<const N: usize>(&self, index: usize) -> Result<[u8; N]> {
        let frame = self
            .frame(index)
            .ok_or_else(|| TetherError::invalid_argument(format_args!("no frame at index {index}")))?;
        frame.try_into().map_err(|_| {
            TetherError::invalid_argument(format_args!("frame {index} is {} bytes, expected {N}", frame.len()))
        })
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        self.fixed::<1>(index).map(|b| b[0])
    }

    pub fn get_u16(&self, index: usize) -> Result<u16> {
        self.fixed(index).map(u16::from_le_bytes)
    }

    pub fn get_u32(&self, index: usize) -> Result<u32> {
        self.fixed(index).map(u32::from_le_bytes)
    }

    pub fn get_str(&self, index: usize) -> Result<&str> {
        let frame = self
            .frame(index)
            .ok_or_else(|| TetherError::invalid_argument(format_args!("no frame at index {index}")))?;
        std::str::from_utf8(frame)
            .map_err(|e| TetherError::invalid_argument(format_args!("frame {index} is not UTF-8: {e}")))
    }

    /// Size of the serialized form: count prefix plus a prefix per frame.
    pub fn encoded_len(&self) -> usize {
        LEN_PREFIX + self.frames.iter().map(|f| LEN_PREFIX + f.len()).sum::<usize>()
    }

    /// Appends the wire form to `dst`.
    pub fn encode_into(&self, dst: &mut Vec<u8>) -> Result<()> {
        let count = prefix(self.frames.len())?;
        dst.reserve(self.encoded_len());
        dst.extend_from_slice(&count.to_le_bytes());
        for frame in &self.frames {
            dst.extend_from_slice(&prefix(frame.len())?.to_le_bytes());
            dst.extend_from_slice(frame);
        }
        Ok(())
    }

    /// Parses one message from the front of `buf`, applying `cfg` limits.
    /// Trailing bytes are ignored.
    pub fn decode(buf: &[u8], cfg: &ProtocolConfig) -> Result<Self> {
        let mut cursor = buf;
        let count = take_prefix(&mut cursor, buf.len())?;
        if count > cfg.max_frames {
            return Err(TetherError::buffer_too_big(count, cfg.max_frames).ctx(format_args!("{count} frames")));
        }

        let mut msg = Message::new();
        msg.reserve(count);
        for _ in 0..count {
            let len = take_prefix(&mut cursor, buf.len())?;
            if len > cfg.max_frame_len {
                return Err(TetherError::buffer_too_big(len, cfg.max_frame_len));
            }
            if cursor.len() < len {
                return Err(TetherError::truncated(buf.len(), buf.len() - cursor.len() + len));
            }
            let (frame, rest) = cursor.split_at(len);
            msg.add_frame(frame);
            cursor = rest;
        }
        Ok(msg)
    }
}

fn prefix(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| TetherError::buffer_too_big(len, u32::MAX as usize))
}

fn take_prefix(cursor: &mut &[u8], total: usize) -> Result<usize> {
    let Some((head, rest)) = cursor.split_first_chunk::<LEN_PREFIX>() else {
        return Err(TetherError::truncated(total, total - cursor.len() + LEN_PREFIX));
    };
    *cursor = rest;
    Ok(u32::from_le_bytes(*head) as usize)
}

impl Index<usize> for Message {
    type Output = [u8];

    fn index(&self, index: usize) -> &[u8] {
        self.get_frame(index)
    }
}

impl<F: AsRef<[u8]>> FromIterator<F> for Message {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self { frames: iter.into_iter().map(|f| f.as_ref().to_vec()).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TetherCode;

    #[test]
    fn frames_keep_insertion_order() {
        let mut msg = Message::new();
        msg.add_frame("a");
        msg.add_frame(b"bb");
        msg.push_frame(b"ccc".to_vec());

        assert_eq!(msg.len(), 3);
        assert_eq!(msg.get_frame(0), b"a");
        assert_eq!(&msg[1], b"bb");
        assert_eq!(msg.iter().collect::<Vec<_>>(), vec![&b"a"[..], &b"bb"[..], &b"ccc"[..]]);
    }

    #[test]
    fn add_frame_copies_caller_buffer() {
        let mut buf = b"first".to_vec();
        let mut msg = Message::new();
        msg.add_frame(&buf);
        buf.copy_from_slice(b"reuse");
        assert_eq!(msg.get_frame(0), b"first");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn get_frame_out_of_range_panics() {
        let msg: Message = ["only"].into_iter().collect();
        let _ = msg.get_frame(1);
    }

    #[test]
    fn clear_resets_but_reuses() {
        let mut msg: Message = ["x", "y"].into_iter().collect();
        msg.clear();
        assert!(msg.is_empty());
        assert_eq!(msg.frame(0), None);
        msg.add_frame("z");
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn typed_frames() {
        let mut msg = Message::new();
        msg.add_u8(7);
        msg.add_u16(0xBEEF);
        msg.add_u32(0xDEAD_BEEF);
        msg.add_str("hello");

        assert_eq!(msg.get_u8(0).unwrap(), 7);
        assert_eq!(msg.get_u16(1).unwrap(), 0xBEEF);
        assert_eq!(msg.get_u32(2).unwrap(), 0xDEAD_BEEF);
        assert_eq!(msg.get_str(3).unwrap(), "hello");

        assert_eq!(msg.get_u32(0).unwrap_err().code, TetherCode::InvalidArgument);
        assert_eq!(msg.get_u8(9).unwrap_err().code, TetherCode::InvalidArgument);
    }

    #[test]
    fn wire_layout_is_u32_le() {
        let msg: Message = ["ab", ""].into_iter().collect();
        let mut wire = Vec::new();
        msg.encode_into(&mut wire).unwrap();

        assert_eq!(wire, [2, 0, 0, 0, 2, 0, 0, 0, b'a', b'b', 0, 0, 0, 0]);
        assert_eq!(wire.len(), msg.encoded_len());
        assert_eq!(Message::decode(&wire, &ProtocolConfig::default()).unwrap(), msg);
    }

    #[test]
    fn decode_rejects_truncated_and_oversize() {
        let msg: Message = ["abcdef"].into_iter().collect();
        let mut wire = Vec::new();
        msg.encode_into(&mut wire).unwrap();

        let err = Message::decode(&wire[..wire.len() - 1], &ProtocolConfig::default()).unwrap_err();
        assert_eq!(err.code, TetherCode::Truncated);

        let cfg = ProtocolConfig { max_frame_len: 4, ..Default::default() };
        assert_eq!(Message::decode(&wire, &cfg).unwrap_err().code, TetherCode::BufferTooBig);

        let cfg = ProtocolConfig { max_frames: 0, ..Default::default() };
        assert_eq!(Message::decode(&wire, &cfg).unwrap_err().code, TetherCode::BufferTooBig);
    }
}

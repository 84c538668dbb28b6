#![cfg(feature = "cbor")]

use crate::{Message, Result, TetherError};
use serde::{Serialize, de::DeserializeOwned};

impl Message {
    /// Serializes `value` as CBOR into a new trailing frame.
    pub fn add_cbor<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let frame = ::serde_cbor::to_vec(value).map_err(TetherError::cbor_encode)?;
        self.push_frame(frame);
        Ok(())
    }

    /// Decodes frame `index` as CBOR.
    pub fn get_cbor<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let frame = self
            .frame(index)
            .ok_or_else(|| TetherError::invalid_argument(format_args!("no frame at index {index}")))?;
        ::serde_cbor::from_slice(frame).map_err(TetherError::cbor_decode)
    }
}

#![cfg(feature = "postcard")]

use crate::{Message, Result, TetherError};

use serde::{Serialize, de::DeserializeOwned};

impl Message {
    /// Serializes `value` with postcard into a new trailing frame.
    pub fn add_postcard<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let frame = postcard::to_allocvec(value).map_err(TetherError::postcard_encode)?;
        self.push_frame(frame);
        Ok(())
    }

    /// Decodes frame `index` as postcard.
    pub fn get_postcard<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let frame = self
            .frame(index)
            .ok_or_else(|| TetherError::invalid_argument(format_args!("no frame at index {index}")))?;
        postcard::from_bytes(frame).map_err(TetherError::postcard_decode)
    }
}

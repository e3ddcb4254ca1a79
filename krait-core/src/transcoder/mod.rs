//! Transcoders
//!
//! Serialization adapters with a common interface. Their options are signals,
//! so the derived encoder configuration is rebuilt only when an option
//! actually changes.

mod json;
mod msgpack;

pub use json::{JsonTranscoder, WriterStyle};
pub use msgpack::MsgPackTranscoder;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::SignalError;

/// Errors raised while encoding or decoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("json transcoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encoding failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decoding failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// An option signal could not be read.
    #[error(transparent)]
    Signal(#[from] SignalError),
}

pub type Result<T, E = TranscodeError> = std::result::Result<T, E>;

/// A wire format.
pub trait Transcoder {
    /// Media type of the encoded bytes.
    fn mimetype(&self) -> &'static str;

    /// Append the encoding of `value` to `buffer`.
    fn encode_into<T>(&self, value: &T, buffer: &mut Vec<u8>) -> Result<()>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned;

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let mut buffer = Vec::new();
        self.encode_into(value, &mut buffer)?;
        Ok(buffer)
    }
}

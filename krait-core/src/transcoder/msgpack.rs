//! MessagePack via `rmp-serde`.

use std::sync::LazyLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::{Result, Transcoder};
use crate::error::SignalError;
use crate::reactive::{Scope, Signal, SignalOwner};

/// Encode structs as maps keyed by field name rather than positional arrays.
static NAMED: LazyLock<Signal<MsgPackTranscoder, bool>> =
    LazyLock::new(|| Signal::new(true).named("named"));

/// MessagePack encoder.
///
/// Decoding accepts both struct layouts regardless of the `named` option.
#[derive(Debug, Default)]
pub struct MsgPackTranscoder {
    scope: Scope,
}

impl SignalOwner for MsgPackTranscoder {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl MsgPackTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compact positional encoding, for peers that share the schema.
    pub fn compact() -> Result<Self, SignalError> {
        let transcoder = Self::new();
        transcoder.set_named(false)?;
        Ok(transcoder)
    }

    pub fn is_named(&self) -> Result<bool, SignalError> {
        NAMED.read(self)
    }

    pub fn set_named(&self, named: bool) -> Result<bool, SignalError> {
        NAMED.write(self, named)
    }
}

impl Transcoder for MsgPackTranscoder {
    fn mimetype(&self) -> &'static str {
        "application/msgpack"
    }

    fn encode_into<T>(&self, value: &T, buffer: &mut Vec<u8>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let start = buffer.len();
        if self.is_named()? {
            rmp_serde::encode::write_named(buffer, value)?;
        } else {
            rmp_serde::encode::write(buffer, value)?;
        }
        trace!(bytes = buffer.len() - start, "encoded msgpack");
        Ok(())
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::TranscodeError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
    }

    fn reading() -> Reading {
        Reading {
            sensor: "t1".to_string(),
            value: 21.5,
        }
    }

    #[test]
    fn named_encoding_is_a_map() {
        let msgpack = MsgPackTranscoder::new();
        let bytes = msgpack.encode(&reading()).unwrap();

        // fixmap with two entries
        assert_eq!(bytes[0], 0x82);
        assert_eq!(msgpack.decode::<Reading>(&bytes).unwrap(), reading());
        assert_eq!(msgpack.mimetype(), "application/msgpack");
    }

    #[test]
    fn compact_encoding_is_an_array() {
        let msgpack = MsgPackTranscoder::compact().unwrap();
        let bytes = msgpack.encode(&reading()).unwrap();

        // fixarray with two entries
        assert_eq!(bytes[0], 0x92);
        assert_eq!(msgpack.decode::<Reading>(&bytes).unwrap(), reading());
    }

    #[test]
    fn decodes_either_layout() {
        let named = MsgPackTranscoder::new();
        let compact = MsgPackTranscoder::compact().unwrap();

        let bytes = compact.encode(&reading()).unwrap();
        assert_eq!(named.decode::<Reading>(&bytes).unwrap(), reading());
    }

    #[test]
    fn truncated_input_fails() {
        let msgpack = MsgPackTranscoder::new();
        let bytes = msgpack.encode(&reading()).unwrap();

        let err = msgpack.decode::<Reading>(&bytes[..3]).unwrap_err();
        assert!(matches!(err, TranscodeError::MsgPackDecode(_)));
    }
}

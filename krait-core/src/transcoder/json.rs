//! JSON via `serde_json`.

use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::trace;

use super::{Result, Transcoder};
use crate::error::SignalError;
use crate::reactive::{Scope, Signal, SignalOwner};

static PRETTY: LazyLock<Signal<JsonTranscoder, bool>> =
    LazyLock::new(|| Signal::new(false).named("pretty"));

static INDENT: LazyLock<Signal<JsonTranscoder, usize>> =
    LazyLock::new(|| Signal::new(2).named("indent"));

static STYLE: LazyLock<Signal<JsonTranscoder, WriterStyle>> = LazyLock::new(|| {
    Signal::computed(|this| {
        if !PRETTY.read(this)? {
            return Ok(WriterStyle::Compact);
        }
        let indent = vec![b' '; INDENT.read(this)?];
        Ok(WriterStyle::Pretty(indent.into()))
    })
    .named("style")
});

/// How the encoder lays out its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStyle {
    Compact,
    /// Indented, one value per line, using this indent unit.
    Pretty(Arc<[u8]>),
}

/// JSON encoder with signal-backed options.
#[derive(Debug, Default)]
pub struct JsonTranscoder {
    scope: Scope,
}

impl SignalOwner for JsonTranscoder {
    fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl JsonTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pretty(&self) -> Result<bool, SignalError> {
        PRETTY.read(self)
    }

    /// Switch between compact and indented output.
    pub fn set_pretty(&self, pretty: bool) -> Result<bool, SignalError> {
        PRETTY.write(self, pretty)
    }

    /// Indent width in spaces, used when pretty.
    pub fn set_indent(&self, width: usize) -> Result<bool, SignalError> {
        INDENT.write(self, width)
    }

    /// The writer style derived from the current options.
    pub fn style(&self) -> Result<WriterStyle, SignalError> {
        STYLE.read(self)
    }
}

impl Transcoder for JsonTranscoder {
    fn mimetype(&self) -> &'static str {
        "application/json"
    }

    fn encode_into<T>(&self, value: &T, buffer: &mut Vec<u8>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let start = buffer.len();
        match self.style()? {
            WriterStyle::Compact => serde_json::to_writer(&mut *buffer, value)?,
            WriterStyle::Pretty(indent) => {
                let formatter = PrettyFormatter::with_indent(&indent);
                let mut serializer = serde_json::Serializer::with_formatter(&mut *buffer, formatter);
                value.serialize(&mut serializer)?;
            }
        }
        trace!(bytes = buffer.len() - start, "encoded json");
        Ok(())
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn compact_by_default() {
        let json = JsonTranscoder::new();
        let bytes = json.encode(&Point { x: 1, y: 2 }).unwrap();

        assert_eq!(bytes, br#"{"x":1,"y":2}"#);
        assert_eq!(json.mimetype(), "application/json");
    }

    #[test]
    fn pretty_follows_option_changes() {
        let json = JsonTranscoder::new();
        json.set_pretty(true).unwrap();
        json.set_indent(4).unwrap();

        let text = String::from_utf8(json.encode(&[1, 2]).unwrap()).unwrap();
        assert_eq!(text, "[\n    1,\n    2\n]");

        json.set_pretty(false).unwrap();
        assert_eq!(json.style().unwrap(), WriterStyle::Compact);
        assert_eq!(json.encode(&[1, 2]).unwrap(), b"[1,2]");
    }

    #[test]
    fn options_are_per_instance() {
        let pretty = JsonTranscoder::new();
        let compact = JsonTranscoder::new();
        pretty.set_pretty(true).unwrap();

        assert!(pretty.is_pretty().unwrap());
        assert!(!compact.is_pretty().unwrap());
    }

    #[test]
    fn encode_into_appends() {
        let json = JsonTranscoder::new();
        let mut buffer = b"data=".to_vec();
        json.encode_into(&true, &mut buffer).unwrap();

        assert_eq!(buffer, b"data=true");
    }

    #[test]
    fn decode_round_trip() {
        let json = JsonTranscoder::new();
        let point: Point = json.decode(br#"{"x":3,"y":-4}"#).unwrap();
        assert_eq!(point, Point { x: 3, y: -4 });

        let err = json.decode::<Point>(b"{").unwrap_err();
        assert!(matches!(err, crate::transcoder::TranscodeError::Json(_)));
    }
}

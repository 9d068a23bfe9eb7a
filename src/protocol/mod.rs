//! Wire protocol shared by the server and the client.
//!
//! One message is one textual frame of `KEY: value` lines:
//!
//! ```text
//! DATA_CHECKSUM: <hex md5 of DATA>
//! DATA_LENGTH: <byte length of DATA>
//! DATA_TYPE: MSG|FILE|LOGS|CAPABILITIES|ERROR
//! <variant keys...>
//! DATA: <payload>
//! DATA_END: True
//! ```
//!
//! A frame is complete once the terminator has arrived and the declared
//! length matches the received `DATA` value.

pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{decode, encode};
pub use frame::{FrameBuffer, FrameReader};
pub use message::{
    Capabilities, ErrorReport, ExecutionLogs, FileSubmission, Gravity, Message, MessageKind,
    Payload,
};

use std::collections::HashMap;

use md5::{Digest, Md5};
use thiserror::Error;

pub const KEY_CHECKSUM: &str = "DATA_CHECKSUM";
pub const KEY_LENGTH: &str = "DATA_LENGTH";
pub const KEY_TYPE: &str = "DATA_TYPE";
pub const KEY_DATA: &str = "DATA";
pub const KEY_END: &str = "DATA_END";
pub const KEY_FILENAME: &str = "DATA_FILENAME";
pub const KEY_EXECUTOR: &str = "CHOSEN_EXECUTOR";
pub const KEY_STATUS: &str = "STATUS";
pub const KEY_GRAVITY: &str = "GRAVITY";

/// Last line of every frame.
pub const TERMINATOR: &str = "DATA_END: True";

/// Text message body asking the server for its capabilities.
pub const CAPABILITIES_QUERY: &str = "CAPABILITIES";

/// Executor name meaning "pick by file suffix".
pub const AUTO_EXECUTOR: &str = "auto";

/// Errors raised while building or interpreting a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing metadata field: {0}")]
    MissingField(&'static str),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed {field} payload: {source}")]
    MalformedPayload {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("metadata value for {0} spans multiple lines")]
    MultilinePayload(String),
}

/// Errors raised while accumulating frames from a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes without completing")]
    TooLarge { limit: usize },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded key/value view of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fetch a field that must be present.
    pub fn require(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.get(key).ok_or(ProtocolError::MissingField(key))
    }

    /// Whether the declared `DATA_LENGTH` matches the byte length of `DATA`.
    ///
    /// Absent keys count as a mismatch.
    pub fn length_matches(&self) -> bool {
        match (self.get(KEY_LENGTH), self.get(KEY_DATA)) {
            (Some(declared), Some(data)) => declared == data.len().to_string(),
            _ => false,
        }
    }
}

/// Hex MD5 digest of a `DATA` value.
pub fn checksum(data: &str) -> String {
    format!("{:x}", Md5::digest(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_hex_md5() {
        assert_eq!(checksum(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn length_matches_requires_both_keys() {
        let mut meta = Metadata::new();
        assert!(!meta.length_matches());

        meta.insert(KEY_DATA, "abc");
        assert!(!meta.length_matches());

        meta.insert(KEY_LENGTH, "3");
        assert!(meta.length_matches());

        meta.insert(KEY_LENGTH, "4");
        assert!(!meta.length_matches());
    }

    #[test]
    fn length_counts_bytes() {
        let mut meta = Metadata::new();
        meta.insert(KEY_DATA, "é");
        meta.insert(KEY_LENGTH, "2");
        assert!(meta.length_matches());
    }

    #[test]
    fn require_reports_missing_key() {
        let meta = Metadata::new();
        let err = meta.require(KEY_TYPE).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("DATA_TYPE")));
    }
}

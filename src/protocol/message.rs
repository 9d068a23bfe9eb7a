//! Typed messages.
//!
//! A [`Message`] is built once from a decoded frame and never mutated. The
//! checksum it carries is the sender's; [`Message::validate_checksum`]
//! recomputes it over the received `DATA` so the caller can decide what to
//! do with a corrupted payload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    checksum, decode, encode, Metadata, ProtocolError, AUTO_EXECUTOR, KEY_CHECKSUM, KEY_DATA,
    KEY_EXECUTOR, KEY_FILENAME, KEY_GRAVITY, KEY_STATUS, KEY_TYPE,
};

/// Value of the `DATA_TYPE` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    File,
    Logs,
    Capabilities,
    Error,
}

impl MessageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "MSG",
            Self::File => "FILE",
            Self::Logs => "LOGS",
            Self::Capabilities => "CAPABILITIES",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MSG" => Ok(Self::Text),
            "FILE" => Ok(Self::File),
            "LOGS" => Ok(Self::Logs),
            "CAPABILITIES" => Ok(Self::Capabilities),
            "ERROR" => Ok(Self::Error),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Severity attached to an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gravity {
    Error,
    Warning,
    Info,
}

impl Gravity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl FromStr for Gravity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ERROR" => Ok(Self::Error),
            "WARNING" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            other => Err(ProtocolError::InvalidField {
                field: KEY_GRAVITY,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source file submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSubmission {
    pub file_name: String,
    pub content: String,
    /// Requested executor friendly name, or `"auto"`.
    pub executor: String,
}

impl FileSubmission {
    pub fn new(
        file_name: impl Into<String>,
        content: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            executor: executor.into(),
        }
    }

    /// Whether the executor should be chosen from the file suffix.
    pub fn is_auto(&self) -> bool {
        self.executor.is_empty() || self.executor == AUTO_EXECUTOR
    }

    /// Text after the last `.` of the file name, if any.
    pub fn suffix(&self) -> Option<&str> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, suffix)| suffix)
            .filter(|suffix| !suffix.is_empty())
    }
}

/// Output of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLogs {
    pub status: i32,
    pub output: String,
}

/// Executor friendly name to availability.
pub type Capabilities = BTreeMap<String, bool>;

/// Error reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub gravity: Gravity,
    pub message: String,
}

impl ErrorReport {
    pub fn new(gravity: Gravity, message: impl Into<String>) -> Self {
        Self {
            gravity,
            message: message.into(),
        }
    }
}

/// Domain payload of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    File(FileSubmission),
    Logs(ExecutionLogs),
    Capabilities(Capabilities),
    Error(ErrorReport),
}

/// Nested structure carried in `DATA` by FILE and LOGS frames.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    data: String,
}

impl Payload {
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::File(_) => MessageKind::File,
            Self::Logs(_) => MessageKind::Logs,
            Self::Capabilities(_) => MessageKind::Capabilities,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Build the wire text for this payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            Self::Text(text) => encode(MessageKind::Text, text, &[]),
            Self::File(file) => {
                let data = envelope(&file.content)?;
                let executor = if file.executor.is_empty() {
                    AUTO_EXECUTOR
                } else {
                    file.executor.as_str()
                };
                encode(
                    MessageKind::File,
                    &data,
                    &[(KEY_FILENAME, &file.file_name), (KEY_EXECUTOR, executor)],
                )
            }
            Self::Logs(logs) => {
                let data = envelope(&logs.output)?;
                let status = logs.status.to_string();
                encode(MessageKind::Logs, &data, &[(KEY_STATUS, &status)])
            }
            Self::Capabilities(capabilities) => {
                let data =
                    serde_json::to_string(capabilities).map_err(|source| {
                        ProtocolError::MalformedPayload {
                            field: KEY_DATA,
                            source,
                        }
                    })?;
                encode(MessageKind::Capabilities, &data, &[])
            }
            Self::Error(report) => {
                // Server-side error text may embed tool output; keep it on one line.
                let text = report.message.replace(&['\r', '\n'][..], " ");
                encode(
                    MessageKind::Error,
                    &text,
                    &[(KEY_GRAVITY, report.gravity.as_str())],
                )
            }
        }
    }

    /// Wire text for a chat message.
    pub fn text(text: impl Into<String>) -> Result<String, ProtocolError> {
        Self::Text(text.into()).encode()
    }

    /// Wire text for a file submission.
    pub fn file(
        file_name: impl Into<String>,
        content: impl Into<String>,
        executor: impl Into<String>,
    ) -> Result<String, ProtocolError> {
        Self::File(FileSubmission::new(file_name, content, executor)).encode()
    }

    /// Wire text for execution output.
    pub fn logs(status: i32, output: impl Into<String>) -> Result<String, ProtocolError> {
        Self::Logs(ExecutionLogs {
            status,
            output: output.into(),
        })
        .encode()
    }

    /// Wire text for a capability advertisement.
    pub fn capabilities(capabilities: Capabilities) -> Result<String, ProtocolError> {
        Self::Capabilities(capabilities).encode()
    }

    /// Wire text for an error report.
    pub fn error(gravity: Gravity, message: impl Into<String>) -> Result<String, ProtocolError> {
        Self::Error(ErrorReport::new(gravity, message)).encode()
    }
}

fn envelope(content: &str) -> Result<String, ProtocolError> {
    serde_json::to_string(&Envelope {
        data: content.to_string(),
    })
    .map_err(|source| ProtocolError::MalformedPayload {
        field: KEY_DATA,
        source,
    })
}

fn open_envelope(data: &str) -> Result<String, ProtocolError> {
    serde_json::from_str::<Envelope>(data)
        .map(|envelope| envelope.data)
        .map_err(|source| ProtocolError::MalformedPayload {
            field: KEY_DATA,
            source,
        })
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    checksum: String,
    data: String,
    payload: Payload,
}

impl Message {
    /// Classify a decoded frame by its `DATA_TYPE` and extract the payload.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, ProtocolError> {
        let kind: MessageKind = metadata.require(KEY_TYPE)?.parse()?;
        let checksum = metadata.require(KEY_CHECKSUM)?.to_string();
        let data = metadata.require(KEY_DATA)?.to_string();

        let payload = match kind {
            MessageKind::Text => Payload::Text(data.clone()),
            MessageKind::File => Payload::File(FileSubmission {
                file_name: metadata.require(KEY_FILENAME)?.to_string(),
                content: open_envelope(&data)?,
                executor: metadata
                    .get(KEY_EXECUTOR)
                    .filter(|name| !name.is_empty())
                    .unwrap_or(AUTO_EXECUTOR)
                    .to_string(),
            }),
            MessageKind::Logs => {
                let raw = metadata.require(KEY_STATUS)?;
                let status = raw.trim().parse().map_err(|_| ProtocolError::InvalidField {
                    field: KEY_STATUS,
                    value: raw.to_string(),
                })?;
                Payload::Logs(ExecutionLogs {
                    status,
                    output: open_envelope(&data)?,
                })
            }
            MessageKind::Capabilities => Payload::Capabilities(
                serde_json::from_str(&data).map_err(|source| ProtocolError::MalformedPayload {
                    field: KEY_DATA,
                    source,
                })?,
            ),
            MessageKind::Error => Payload::Error(ErrorReport {
                gravity: metadata.require(KEY_GRAVITY)?.parse()?,
                message: data.clone(),
            }),
        };

        Ok(Self {
            checksum,
            data,
            payload,
        })
    }

    /// Decode and classify a complete frame.
    pub fn parse(wire: &str) -> Result<Self, ProtocolError> {
        Self::from_metadata(&decode(wire))
    }

    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Checksum declared by the sender.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Recompute the MD5 of `DATA` and compare it to the declared checksum.
    pub fn validate_checksum(&self) -> bool {
        checksum(&self.data) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_roundtrips() {
        let mut capabilities = Capabilities::new();
        capabilities.insert("Python".to_string(), true);
        capabilities.insert("Java".to_string(), false);

        let payloads = vec![
            Payload::Text("hello server".to_string()),
            Payload::File(FileSubmission::new("a.py", "print(1)\nprint(2)\n", "auto")),
            Payload::Logs(ExecutionLogs {
                status: 3,
                output: "line 1\nline 2\n".to_string(),
            }),
            Payload::Capabilities(capabilities),
            Payload::Error(ErrorReport::new(Gravity::Warning, "careful")),
        ];

        for payload in payloads {
            let wire = payload.encode().unwrap();
            let message = Message::parse(&wire).unwrap();
            assert_eq!(message.kind(), payload.kind());
            assert!(message.validate_checksum());
            assert_eq!(message.payload(), &payload);
        }
    }

    #[test]
    fn file_content_is_nested_json() {
        let wire = Payload::file("a.py", "print(1)\n", "Python").unwrap();
        let meta = decode(&wire);
        assert_eq!(meta.get(KEY_DATA), Some(r#"{"data":"print(1)\n"}"#));
        assert_eq!(meta.get(KEY_FILENAME), Some("a.py"));
        assert_eq!(meta.get(KEY_EXECUTOR), Some("Python"));
    }

    #[test]
    fn missing_executor_defaults_to_auto() {
        let wire = "DATA_CHECKSUM: x\nDATA_LENGTH: 10\nDATA_TYPE: FILE\n\
                    DATA_FILENAME: a.c\nDATA: {\"data\":\"\"}\nDATA_END: True";
        let message = Message::parse(wire).unwrap();
        match message.payload() {
            Payload::File(file) => {
                assert_eq!(file.executor, AUTO_EXECUTOR);
                assert!(file.is_auto());
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let wire = "DATA_CHECKSUM: x\nDATA_LENGTH: 1\nDATA_TYPE: PING\nDATA: x\nDATA_END: True";
        let err = Message::parse(wire).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(ref t) if t == "PING"));
    }

    #[test]
    fn invalid_gravity_is_rejected() {
        let wire = "DATA_CHECKSUM: x\nDATA_LENGTH: 1\nDATA_TYPE: ERROR\n\
                    GRAVITY: FATAL\nDATA: x\nDATA_END: True";
        let err = Message::parse(wire).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "GRAVITY", .. }));
    }

    #[test]
    fn invalid_status_is_rejected() {
        let wire = Payload::logs(0, "ok").unwrap().replace("STATUS: 0", "STATUS: zero");
        let err = Message::parse(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "STATUS", .. }));
    }

    #[test]
    fn tampered_data_fails_checksum_but_keeps_length() {
        let wire = Payload::text("abcdef").unwrap();
        let tampered = wire.replace("DATA: abcdef", "DATA: abcdeX");

        let meta = decode(&tampered);
        assert!(meta.length_matches());

        let message = Message::from_metadata(&meta).unwrap();
        assert!(!message.validate_checksum());
    }

    #[test]
    fn error_text_is_flattened() {
        let wire = Payload::error(Gravity::Error, "first\nsecond").unwrap();
        let message = Message::parse(&wire).unwrap();
        match message.into_payload() {
            Payload::Error(report) => {
                assert_eq!(report.gravity, Gravity::Error);
                assert_eq!(report.message, "first second");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn text_with_newline_cannot_be_encoded() {
        assert!(matches!(
            Payload::text("a\nb"),
            Err(ProtocolError::MultilinePayload(_))
        ));
    }

    #[test]
    fn suffix_is_text_after_last_dot() {
        assert_eq!(FileSubmission::new("a.tar.py", "", "auto").suffix(), Some("py"));
        assert_eq!(FileSubmission::new("Makefile", "", "auto").suffix(), None);
        assert_eq!(FileSubmission::new("trailing.", "", "auto").suffix(), None);
    }
}

//! Text codec for frames.
//!
//! `encode` emits fields in a fixed order with `DATA` last before the
//! terminator. `decode` is permissive: anything that is not a `KEY: value`
//! line is skipped, and completeness is judged by the frame buffer.

use std::fmt::Write as _;

use tracing::trace;

use super::{
    checksum, Metadata, MessageKind, ProtocolError, KEY_CHECKSUM, KEY_DATA, KEY_END, KEY_LENGTH,
    KEY_TYPE, TERMINATOR,
};

const SEPARATOR: &str = ": ";

/// Serialize one frame.
///
/// Checksum and length are derived from `payload`. `extra` holds the
/// variant keys and is written in the given order.
pub fn encode(
    kind: MessageKind,
    payload: &str,
    extra: &[(&str, &str)],
) -> Result<String, ProtocolError> {
    for (key, value) in extra {
        ensure_single_line(key, value)?;
    }
    ensure_single_line(KEY_DATA, payload)?;

    let mut wire = String::with_capacity(payload.len() + 128);
    // Writing into a String cannot fail.
    let _ = writeln!(wire, "{KEY_CHECKSUM}{SEPARATOR}{}", checksum(payload));
    let _ = writeln!(wire, "{KEY_LENGTH}{SEPARATOR}{}", payload.len());
    let _ = writeln!(wire, "{KEY_TYPE}{SEPARATOR}{}", kind.as_str());
    for (key, value) in extra {
        let _ = writeln!(wire, "{key}{SEPARATOR}{value}");
    }
    let _ = writeln!(wire, "{KEY_DATA}{SEPARATOR}{payload}");
    wire.push_str(TERMINATOR);

    trace!(kind = kind.as_str(), len = wire.len(), "Encoded frame");
    Ok(wire)
}

/// Parse frame text into its metadata.
///
/// Lines are split once on `": "`. Any line mentioning `DATA_END` marks the
/// frame as terminated even when the line itself is malformed.
pub fn decode(wire: &str) -> Metadata {
    let mut metadata = Metadata::new();
    for line in wire.split('\n') {
        if line.contains(KEY_END) {
            metadata.insert(KEY_END, "True");
        }
        if let Some((key, value)) = line.split_once(SEPARATOR) {
            metadata.insert(key, value);
        }
    }
    metadata
}

fn ensure_single_line(key: &str, value: &str) -> Result<(), ProtocolError> {
    if value.contains('\n') {
        return Err(ProtocolError::MultilinePayload(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_field_order() {
        let wire = encode(MessageKind::Logs, "xyz", &[("STATUS", "0")]).unwrap();
        let lines: Vec<_> = wire.split('\n').collect();
        assert_eq!(
            lines,
            vec![
                "DATA_CHECKSUM: d16fb36f0911f878998c136191af705e",
                "DATA_LENGTH: 3",
                "DATA_TYPE: LOGS",
                "STATUS: 0",
                "DATA: xyz",
                "DATA_END: True",
            ]
        );
    }

    #[test]
    fn roundtrip_recovers_data_and_type() {
        for payload in ["", "hello", "a: b: c", "naïve café"] {
            let wire = encode(MessageKind::Text, payload, &[]).unwrap();
            let meta = decode(&wire);
            assert_eq!(meta.get(KEY_DATA), Some(payload));
            assert_eq!(meta.get(KEY_TYPE), Some("MSG"));
            assert_eq!(meta.get(KEY_CHECKSUM), Some(checksum(payload).as_str()));
            assert!(meta.length_matches());
        }
    }

    #[test]
    fn encode_rejects_newlines() {
        let err = encode(MessageKind::Text, "one\ntwo", &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::MultilinePayload(ref key) if key == "DATA"));

        let err = encode(MessageKind::Error, "x", &[("GRAVITY", "ERR\nOR")]).unwrap_err();
        assert!(matches!(err, ProtocolError::MultilinePayload(ref key) if key == "GRAVITY"));
    }

    #[test]
    fn decode_ignores_unrecognized_lines() {
        let meta = decode("garbage\nDATA_TYPE: MSG\n\nno separator here");
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get(KEY_TYPE), Some("MSG"));
    }

    #[test]
    fn decode_forces_end_marker_on_malformed_line() {
        let meta = decode("DATA: x\nDATA_END");
        assert_eq!(meta.get(KEY_END), Some("True"));

        let meta = decode("DATA: x\nDATA_END:True");
        assert_eq!(meta.get(KEY_END), Some("True"));
    }

    #[test]
    fn decode_splits_on_first_separator_only() {
        let meta = decode("DATA: key: value");
        assert_eq!(meta.get(KEY_DATA), Some("key: value"));
    }
}

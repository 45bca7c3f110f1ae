//! JSON codec for Parrot envelopes.
//!
//! Inbound text is parsed in two steps: the envelope first, so an unknown
//! event name can be told apart from a bad payload, then the payload for
//! the named event.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum envelope size (1 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Maximum user identity length in bytes.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Maximum display name length in characters.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum size.
    #[error("Envelope size {0} exceeds maximum {MAX_ENVELOPE_SIZE}")]
    EnvelopeTooLarge(usize),

    /// Envelope is not a JSON object with an `event` field.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Event name is not part of the protocol.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Event could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Payload does not match the named event.
    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A field parsed but failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Validate a user identity.
///
/// # Errors
///
/// Returns an error message if the identity is invalid.
pub fn validate_user_id(user_id: &str) -> Result<(), &'static str> {
    if user_id.is_empty() {
        return Err("cannot be empty");
    }
    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err("too long");
    }
    if user_id.chars().any(char::is_control) {
        return Err("contains control characters");
    }
    Ok(())
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err("too long");
    }
    if username.chars().any(char::is_control) {
        return Err("contains control characters");
    }
    Ok(())
}

fn payload<T: DeserializeOwned>(
    event: &'static str,
    value: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

fn check_user_id(user_id: &str) -> Result<(), ProtocolError> {
    validate_user_id(user_id).map_err(|reason| ProtocolError::InvalidField {
        field: "userId",
        reason,
    })
}

/// Decode a client event from envelope text.
///
/// `joinQueue` is accepted as a legacy name for `join`.
///
/// # Errors
///
/// Returns an error if the text is too large, not an envelope, names an
/// unknown event, or carries an invalid payload.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge(text.len()));
    }

    let raw: RawEnvelope = serde_json::from_str(text)?;

    let event = match raw.event.as_str() {
        "join" | "joinQueue" => ClientEvent::Join(payload("join", raw.payload)?),
        "skip" => ClientEvent::Skip(payload("skip", raw.payload)?),
        "message" => ClientEvent::Message(payload("message", raw.payload)?),
        "typing" => ClientEvent::Typing(payload("typing", raw.payload)?),
        _ => return Err(ProtocolError::UnknownEvent(raw.event)),
    };

    check_user_id(event.user_id())?;
    if let ClientEvent::Join(join) = &event {
        validate_username(&join.username).map_err(|reason| ProtocolError::InvalidField {
            field: "username",
            reason,
        })?;
    }

    Ok(event)
}

/// Encode a server event to envelope text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Encode a client event to envelope text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Decode a server event from envelope text.
///
/// # Errors
///
/// Returns an error if the text is too large or not a known server event.
pub fn decode_server(text: &str) -> Result<ServerEvent, ProtocolError> {
    if text.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Category, JoinPayload};

    #[test]
    fn test_decode_join() {
        let text = r#"{"event":"join","payload":{"userId":"u-1","username":"Guest#1234","category":"male"}}"#;
        let event = decode(text).unwrap();

        assert_eq!(
            event,
            ClientEvent::Join(JoinPayload::new("u-1", "Guest#1234", Category::Male))
        );
    }

    #[test]
    fn test_decode_legacy_join_queue() {
        let text = r#"{"event":"joinQueue","payload":{"userId":"u-1","username":"Guest#1234","gender":"female","premium":true}}"#;

        match decode(text).unwrap() {
            ClientEvent::Join(join) => {
                assert_eq!(join.category, Category::Female);
                assert_eq!(join.priority_flag, Some(true));
            }
            other => panic!("Expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event() {
        let text = r#"{"event":"dance","payload":{"userId":"u-1"}}"#;
        match decode(text) {
            Err(ProtocolError::UnknownEvent(name)) => assert_eq!(name, "dance"),
            other => panic!("Expected UnknownEvent error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"payload":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_payload_fields() {
        let text = r#"{"event":"typing","payload":{"userId":"u-1"}}"#;
        assert!(matches!(
            decode(text),
            Err(ProtocolError::InvalidPayload { event: "typing", .. })
        ));

        let text = r#"{"event":"skip"}"#;
        assert!(matches!(
            decode(text),
            Err(ProtocolError::InvalidPayload { event: "skip", .. })
        ));
    }

    #[test]
    fn test_decode_checks_username() {
        let join = |username: &str| {
            format!(
                r#"{{"event":"join","payload":{{"userId":"a","username":"{username}","category":"male"}}}}"#
            )
        };

        let longest = "a".repeat(MAX_USERNAME_LENGTH);
        assert!(decode(&join(&longest)).is_ok());

        let too_long = "a".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(matches!(
            decode(&join(&too_long)),
            Err(ProtocolError::InvalidField { field: "username", .. })
        ));

        assert!(matches!(
            decode(&join("bad\\u0007name")),
            Err(ProtocolError::InvalidField { field: "username", .. })
        ));

        // Length counts characters, not bytes
        assert_eq!(validate_username(&"é".repeat(MAX_USERNAME_LENGTH)), Ok(()));
        assert_eq!(validate_username("tab\there"), Err("contains control characters"));
    }

    #[test]
    fn test_decode_rejects_bad_identity() {
        let text = r#"{"event":"skip","payload":{"userId":""}}"#;
        assert!(matches!(
            decode(text),
            Err(ProtocolError::InvalidField { field: "userId", .. })
        ));

        let long_id = "a".repeat(MAX_USER_ID_LENGTH + 1);
        let text = format!(r#"{{"event":"skip","payload":{{"userId":"{long_id}"}}}}"#);
        assert!(decode(&text).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_category() {
        let text = r#"{"event":"join","payload":{"userId":"u-1","username":"x","category":"other"}}"#;
        assert!(matches!(
            decode(text),
            Err(ProtocolError::InvalidPayload { event: "join", .. })
        ));
    }

    #[test]
    fn test_envelope_too_large() {
        let text = "x".repeat(MAX_ENVELOPE_SIZE + 1);
        assert!(matches!(
            decode(&text),
            Err(ProtocolError::EnvelopeTooLarge(_))
        ));
    }

    #[test]
    fn test_server_event_decodes_what_it_encodes() {
        let event = ServerEvent::typing("u-1", true);
        let text = encode(&event).unwrap();
        assert_eq!(text, r#"{"event":"typing","payload":{"from":"u-1","typing":true}}"#);
        assert_eq!(decode_server(&text).unwrap(), event);
    }

    #[test]
    fn test_client_encode_is_accepted_by_decode() {
        let event = ClientEvent::message("u-1", "hello");
        let text = encode_client(&event).unwrap();
        assert_eq!(decode(&text).unwrap(), event);
    }
}

//! Event envelopes for the Parrot protocol.
//!
//! Events are adjacently tagged: the variant name travels in `event`
//! and its fields in `payload`. Field names are camelCase on the wire,
//! except `created_at` on relayed chat messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Matching category.
///
/// A joining user is matched against the opposite category first and
/// waits in their own category's pool otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Male,
    Female,
}

impl Category {
    /// The category a user of this category is matched against first.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Category::Male => Category::Female,
            Category::Female => Category::Male,
        }
    }

    /// Wire name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Male => "male",
            Category::Female => "female",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `join` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Identity issued by the session service.
    pub user_id: String,
    /// Display name shown to the partner.
    pub username: String,
    /// Matching category. Older clients send it as `gender`.
    #[serde(alias = "gender")]
    pub category: Category,
    /// Reserved for priority matching; carried but not used for ordering.
    #[serde(default, alias = "premium", skip_serializing_if = "Option::is_none")]
    pub priority_flag: Option<bool>,
}

impl JoinPayload {
    /// Create a join payload without a priority flag.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            category,
            priority_flag: None,
        }
    }
}

/// Payload of a `skip` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipPayload {
    pub user_id: String,
}

/// Payload of an inbound chat `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub user_id: String,
    pub text: String,
}

/// Payload of an inbound `typing` indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: String,
    pub typing: bool,
}

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    /// Enter matchmaking.
    #[serde(rename = "join")]
    Join(JoinPayload),

    /// Leave the current partner.
    #[serde(rename = "skip")]
    Skip(SkipPayload),

    /// Chat text for the current partner.
    #[serde(rename = "message")]
    Message(MessagePayload),

    /// Typing indicator for the current partner.
    #[serde(rename = "typing")]
    Typing(TypingPayload),
}

impl ClientEvent {
    /// Canonical event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Skip(_) => "skip",
            ClientEvent::Message(_) => "message",
            ClientEvent::Typing(_) => "typing",
        }
    }

    /// Identity the event claims to come from.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            ClientEvent::Join(p) => &p.user_id,
            ClientEvent::Skip(p) => &p.user_id,
            ClientEvent::Message(p) => &p.user_id,
            ClientEvent::Typing(p) => &p.user_id,
        }
    }

    /// Create a `join` event.
    #[must_use]
    pub fn join(user_id: impl Into<String>, username: impl Into<String>, category: Category) -> Self {
        ClientEvent::Join(JoinPayload::new(user_id, username, category))
    }

    /// Create a `skip` event.
    #[must_use]
    pub fn skip(user_id: impl Into<String>) -> Self {
        ClientEvent::Skip(SkipPayload {
            user_id: user_id.into(),
        })
    }

    /// Create a chat `message` event.
    #[must_use]
    pub fn message(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        ClientEvent::Message(MessagePayload {
            user_id: user_id.into(),
            text: text.into(),
        })
    }

    /// Create a `typing` event.
    #[must_use]
    pub fn typing(user_id: impl Into<String>, typing: bool) -> Self {
        ClientEvent::Typing(TypingPayload {
            user_id: user_id.into(),
            typing,
        })
    }
}

/// Payload of `matched`. Each side receives its counterpart's details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPayload {
    pub partner_id: String,
    pub partner_username: String,
    pub partner_category: Category,
    pub room_id: String,
}

/// Payload of `searching` and `partnerDisconnected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of a relayed chat `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    /// Sender identity.
    pub from: String,
    pub text: String,
    /// ISO-8601 timestamp stamped by the server.
    pub created_at: String,
}

/// Payload of a relayed `typing` indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNoticePayload {
    pub from: String,
    pub typing: bool,
}

/// An event sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    /// A partner was found.
    #[serde(rename = "matched")]
    Matched(MatchedPayload),

    /// The recipient is waiting for a partner.
    #[serde(rename = "searching")]
    Searching(NoticePayload),

    /// The recipient's partner left.
    #[serde(rename = "partnerDisconnected")]
    PartnerDisconnected(NoticePayload),

    /// Chat text from the partner.
    #[serde(rename = "message")]
    Message(ChatMessagePayload),

    /// Typing indicator from the partner.
    #[serde(rename = "typing")]
    Typing(TypingNoticePayload),
}

impl ServerEvent {
    /// Event name as sent on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Matched(_) => "matched",
            ServerEvent::Searching(_) => "searching",
            ServerEvent::PartnerDisconnected(_) => "partnerDisconnected",
            ServerEvent::Message(_) => "message",
            ServerEvent::Typing(_) => "typing",
        }
    }

    /// Create a `matched` event describing the recipient's counterpart.
    #[must_use]
    pub fn matched(
        partner_id: impl Into<String>,
        partner_username: impl Into<String>,
        partner_category: Category,
        room_id: impl Into<String>,
    ) -> Self {
        ServerEvent::Matched(MatchedPayload {
            partner_id: partner_id.into(),
            partner_username: partner_username.into(),
            partner_category,
            room_id: room_id.into(),
        })
    }

    /// Create a `searching` event.
    #[must_use]
    pub fn searching(message: impl Into<String>) -> Self {
        ServerEvent::Searching(NoticePayload {
            message: Some(message.into()),
        })
    }

    /// Create a `partnerDisconnected` event.
    #[must_use]
    pub fn partner_disconnected(message: impl Into<String>) -> Self {
        ServerEvent::PartnerDisconnected(NoticePayload {
            message: Some(message.into()),
        })
    }

    /// Create a relayed chat `message` event.
    #[must_use]
    pub fn message(
        from: impl Into<String>,
        text: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        ServerEvent::Message(ChatMessagePayload {
            from: from.into(),
            text: text.into(),
            created_at: created_at.into(),
        })
    }

    /// Create a relayed `typing` event.
    #[must_use]
    pub fn typing(from: impl Into<String>, typing: bool) -> Self {
        ServerEvent::Typing(TypingNoticePayload {
            from: from.into(),
            typing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_opposite() {
        assert_eq!(Category::Male.opposite(), Category::Female);
        assert_eq!(Category::Female.opposite(), Category::Male);
        assert_eq!(Category::Female.to_string(), "female");
    }

    #[test]
    fn test_matched_wire_shape() {
        let event = ServerEvent::matched("u-2", "Guest#4821", Category::Female, "room-1");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "event": "matched",
                "payload": {
                    "partnerId": "u-2",
                    "partnerUsername": "Guest#4821",
                    "partnerCategory": "female",
                    "roomId": "room-1"
                }
            })
        );
    }

    #[test]
    fn test_message_keeps_snake_case_timestamp() {
        let event = ServerEvent::message("u-1", "hi", "2025-01-01T00:00:00.000Z");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], "message");
        assert_eq!(value["payload"]["created_at"], "2025-01-01T00:00:00.000Z");
        assert_eq!(value["payload"]["from"], "u-1");
    }

    #[test]
    fn test_notice_without_message_is_empty_object() {
        let event = ServerEvent::Searching(NoticePayload::default());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "searching", "payload": {}}));
    }

    #[test]
    fn test_client_event_names() {
        assert_eq!(ClientEvent::skip("u-1").name(), "skip");
        assert_eq!(ClientEvent::typing("u-1", true).user_id(), "u-1");
        assert_eq!(
            ServerEvent::partner_disconnected("bye").name(),
            "partnerDisconnected"
        );
    }
}

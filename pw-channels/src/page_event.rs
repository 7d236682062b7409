//! Inbound webhook payloads.
//!
//! A body is parsed exactly once into [`PlatformEvent`]. Page messaging
//! notifications get a typed view; every other shape is kept verbatim so it
//! can still be recorded and displayed.

use crate::types::{MessageId, PageId, SenderId};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

const PAGE_OBJECT: &str = "page";

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    PageMessaging(PageNotification),
    Unrecognized(Value),
}

impl PlatformEvent {
    /// Classify an already-decoded JSON body.
    pub fn from_value(value: Value) -> Self {
        if value.get("object").and_then(Value::as_str) != Some(PAGE_OBJECT) {
            return Self::Unrecognized(value);
        }
        match serde_json::from_value::<PageNotificationWire>(value.clone()) {
            Ok(wire) => Self::PageMessaging(PageNotification {
                entries: wire.entry,
                raw: value,
            }),
            Err(error) => {
                tracing::debug!(%error, "page object did not match the messaging shape");
                Self::Unrecognized(value)
            }
        }
    }

    /// Decode a raw request body. Bytes that are not JSON are kept as a string.
    pub fn from_slice(raw: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(error) => {
                tracing::warn!(%error, bytes = raw.len(), "webhook body is not json; storing raw text");
                Self::Unrecognized(Value::String(String::from_utf8_lossy(raw).into_owned()))
            }
        }
    }

    pub fn as_page_messaging(&self) -> Option<&PageNotification> {
        match self {
            Self::PageMessaging(notification) => Some(notification),
            Self::Unrecognized(_) => None,
        }
    }

    /// First messaging sub-event, if this is a page notification that carries one.
    pub fn first_messaging(&self) -> Option<&MessagingEvent> {
        self.as_page_messaging()
            .and_then(PageNotification::first_messaging)
    }

    pub fn raw(&self) -> &Value {
        match self {
            Self::PageMessaging(notification) => &notification.raw,
            Self::Unrecognized(value) => value,
        }
    }
}

impl Serialize for PlatformEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageNotification {
    entries: Vec<PageEntry>,
    raw: Value,
}

impl PageNotification {
    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub fn first_messaging(&self) -> Option<&MessagingEvent> {
        self.entries
            .iter()
            .flat_map(|entry| entry.messaging.iter())
            .next()
    }
}

#[derive(Debug, Deserialize)]
struct PageNotificationWire {
    #[serde(default)]
    entry: Vec<PageEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageEntry {
    #[serde(default)]
    pub id: Option<PageId>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagingEvent {
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<MessagePayload>,
}

impl MessagingEvent {
    pub fn sender_id(&self) -> Option<SenderId> {
        SenderId::non_blank(self.sender.as_ref().and_then(|p| p.id.as_deref()))
    }

    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::non_blank(self.message.as_ref().and_then(|m| m.mid.as_deref()))
    }

    /// Free text of the message; `None` for attachments, reactions and blanks.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Copies of messages the page itself sent.
    pub fn is_echo(&self) -> bool {
        self.message.as_ref().is_some_and(|m| m.is_echo)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
}

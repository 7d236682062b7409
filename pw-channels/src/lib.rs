//! Messaging-platform types and adapters for pagewire.
//!
//! Inbound webhook bodies become [`PlatformEvent`]; outbound replies go
//! through a [`ChannelAdapter`].

mod messenger;
mod page_event;
mod traits;
mod types;

pub use messenger::{DEFAULT_GRAPH_API_VERSION, DEFAULT_GRAPH_BASE_URL, MessengerAdapter};
pub use page_event::{
    MessagePayload, MessagingEvent, PageEntry, PageNotification, Participant, PlatformEvent,
};
pub use traits::ChannelAdapter;
pub use types::{MessageId, OutboundMessage, PageId, SendReceipt, SenderId};

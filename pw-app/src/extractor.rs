//! Rebuilds model input from the ledger.

use crate::config::ContextWindow;
use crate::ledger::{EntryPayload, EntryRole, LedgerEntry};
use chrono::SecondsFormat;
use pw_llm::ChatMessage;
use std::sync::Arc;

pub const NO_TEXT_PLACEHOLDER: &str = "(no text)";

/// Turns for the model, in delivery order. Empty when nothing qualifies.
///
/// `snapshot` is newest-first, as the ledger returns it.
pub fn extract_turns(snapshot: &[Arc<LedgerEntry>], window: ContextWindow) -> Vec<ChatMessage> {
    let mut qualifying = snapshot.iter().filter_map(|entry| to_turn(entry));
    match window {
        ContextWindow::Latest => qualifying.next().into_iter().collect(),
        ContextWindow::All => {
            let mut turns: Vec<ChatMessage> = qualifying.collect();
            turns.reverse();
            turns
        }
    }
}

fn to_turn(entry: &LedgerEntry) -> Option<ChatMessage> {
    let stamp = entry
        .received_at
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    match (entry.role, &entry.payload) {
        (EntryRole::User, EntryPayload::Event(event)) => {
            // Echoes duplicate the stored assistant entry.
            let messaging = event.first_messaging().filter(|m| !m.is_echo())?;
            let text = messaging.text().unwrap_or(NO_TEXT_PLACEHOLDER);
            Some(ChatMessage::user(format!("[{stamp}] {text}")))
        }
        (EntryRole::Assistant, EntryPayload::Text(text)) => {
            Some(ChatMessage::assistant(format!("[{stamp}] {text}")))
        }
        _ => None,
    }
}

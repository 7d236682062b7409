//! Ingestion pipeline: append, then (for user messages) extract, dispatch and
//! reply, then trim the ledger.

use crate::config::ContextWindow;
use crate::dispatcher::{DispatchOutcome, ModelDispatcher};
use crate::extractor::extract_turns;
use crate::ledger::{EntryDraft, SharedLedger};
use crate::reply::{ReplyOutcome, ReplyRouter};
use pw_channels::{MessageId, PlatformEvent};
use tracing::Instrument;

#[derive(Debug)]
pub struct PipelineReport {
    pub arrival_order: u64,
    /// `None` when the event was not a user message.
    pub dispatch: Option<DispatchOutcome>,
    /// `None` when no reply was attempted.
    pub reply: Option<ReplyOutcome>,
    pub evicted: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    ledger: SharedLedger,
    window: ContextWindow,
    dispatcher: ModelDispatcher,
    replies: ReplyRouter,
}

impl Pipeline {
    pub fn new(
        ledger: SharedLedger,
        window: ContextWindow,
        dispatcher: ModelDispatcher,
        replies: ReplyRouter,
    ) -> Self {
        Self {
            ledger,
            window,
            dispatcher,
            replies,
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn replies_enabled(&self) -> bool {
        self.replies.is_enabled()
    }

    pub fn model_id(&self) -> &str {
        self.dispatcher.model_id()
    }

    /// Runs [`Pipeline::ingest`] on its own task. Dropping the returned future
    /// (client disconnect, outer request timeout) leaves the task running, so
    /// the append is always followed by the eviction.
    pub async fn ingest_to_completion(
        &self,
        source_address: Option<String>,
        event: PlatformEvent,
    ) -> Option<PipelineReport> {
        let pipeline = self.clone();
        let task = tokio::spawn(
            async move { pipeline.ingest(source_address, event).await }.in_current_span(),
        );
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "ingestion task failed");
                None
            }
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(source = ?source_address))]
    pub async fn ingest(&self, source_address: Option<String>, event: PlatformEvent) -> PipelineReport {
        let trigger = event
            .first_messaging()
            .filter(|messaging| {
                if messaging.is_echo() {
                    tracing::debug!("echo of a page-sent message; not dispatching");
                }
                !messaging.is_echo()
            })
            .map(|messaging| (messaging.sender_id(), messaging.message_id()));

        let entry = self
            .ledger
            .append(EntryDraft::inbound(source_address, event))
            .await;
        let mut report = PipelineReport {
            arrival_order: entry.arrival_order,
            dispatch: None,
            reply: None,
            evicted: 0,
        };

        if let Some((sender, message_id)) = trigger {
            let turns = extract_turns(&self.ledger.snapshot().await, self.window);
            let outcome = self.dispatcher.dispatch(turns).await;
            if let Some(text) = outcome.reply_text() {
                match sender.as_ref() {
                    Some(sender) => {
                        report.reply =
                            Some(self.replies.route(Some(sender), message_id.as_ref(), text).await);
                    }
                    None => tracing::info!("inbound message has no sender id; reply not routed"),
                }
            }
            report.dispatch = Some(outcome);
        }

        report.evicted = self.ledger.evict_overflow().await;
        tracing::info!(
            arrival_order = report.arrival_order,
            dispatch = report.dispatch.as_ref().map(DispatchOutcome::label),
            dispatch_error = report.dispatch.as_ref().and_then(DispatchOutcome::error),
            reply = report.reply.as_ref().map(ReplyOutcome::label),
            reply_reason = report.reply.as_ref().and_then(ReplyOutcome::reason),
            reply_message_id = report
                .reply
                .as_ref()
                .and_then(ReplyOutcome::message_id)
                .map(MessageId::as_str),
            evicted = report.evicted,
            "webhook event processed"
        );
        report
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{pipeline, pipeline_with_timeout};
    use super::*;
    use crate::dispatcher::testing::{FakeModel, FakeReply};
    use crate::ledger::{EntryPayload, EntryRole};
    use crate::reply::testing::{FakeChannel, FakeSend};
    use pw_channels::ChannelAdapter;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn page_message(sender: Option<&str>, text: &str) -> PlatformEvent {
        let mut messaging = json!({ "message": { "mid": "m_in", "text": text } });
        if let Some(sender) = sender {
            messaging["sender"] = json!({ "id": sender });
        }
        PlatformEvent::from_value(json!({
            "object": "page",
            "entry": [{ "id": "PAGE", "messaging": [messaging] }]
        }))
    }

    fn channel(channel: &Arc<FakeChannel>) -> Option<Arc<dyn ChannelAdapter>> {
        Some(channel.clone() as Arc<dyn ChannelAdapter>)
    }

    #[tokio::test]
    async fn user_message_flows_through_model_and_reply() {
        let model = FakeModel::text("{\"reply\":\"hi\"}");
        let sent = FakeChannel::new(FakeSend::Ok);
        let pipeline = pipeline(100, ContextWindow::All, model.clone(), channel(&sent));

        let report = pipeline
            .ingest(Some("10.0.0.1".to_string()), page_message(Some("PSID"), "hello"))
            .await;

        assert_eq!(report.dispatch.as_ref().map(DispatchOutcome::label), Some("replied"));
        assert_eq!(report.reply.as_ref().map(ReplyOutcome::label), Some("sent"));

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().any(|turn| turn.content.contains("hello")));

        let deliveries = sent.sent();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "PSID");
        assert_eq!(deliveries[0].1.content, "{\"reply\":\"hi\"}");
        assert_eq!(
            deliveries[0].1.reply_to_message_id,
            Some(MessageId::new("m_in"))
        );

        let snapshot = pipeline.ledger().snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, EntryRole::Assistant);
        assert_eq!(snapshot[1].role, EntryRole::User);
        assert_eq!(snapshot[1].source_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn failed_dispatch_leaves_user_entry_at_head() {
        let sent = FakeChannel::new(FakeSend::Ok);
        let pipeline = pipeline(
            100,
            ContextWindow::All,
            FakeModel::new(FakeReply::Error),
            channel(&sent),
        );

        let report = pipeline.ingest(None, page_message(Some("PSID"), "hello")).await;
        assert_eq!(report.dispatch.as_ref().map(DispatchOutcome::label), Some("failed"));
        assert!(report.reply.is_none());
        assert!(sent.sent().is_empty());

        let snapshot = pipeline.ledger().snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, EntryRole::User);
    }

    #[tokio::test]
    async fn missing_sender_never_reaches_reply_router() {
        let model = FakeModel::text("ok");
        let sent = FakeChannel::new(FakeSend::Ok);
        let pipeline = pipeline(100, ContextWindow::All, model.clone(), channel(&sent));

        let report = pipeline.ingest(None, page_message(None, "hello")).await;
        assert!(report.reply.is_none());
        assert!(sent.sent().is_empty());
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_events_are_stored_without_dispatch() {
        let model = FakeModel::text("unused");
        let pipeline = pipeline(100, ContextWindow::All, model.clone(), None);

        let report = pipeline
            .ingest(None, PlatformEvent::from_value(json!({ "object": "user", "entry": [] })))
            .await;
        assert!(report.dispatch.is_none());
        assert!(model.calls().is_empty());
        let snapshot = pipeline.ledger().snapshot().await;
        assert!(matches!(
            snapshot[0].payload,
            EntryPayload::Event(PlatformEvent::Unrecognized(_))
        ));
    }

    #[tokio::test]
    async fn echoes_are_recorded_but_not_answered() {
        let model = FakeModel::text("unused");
        let pipeline = pipeline(100, ContextWindow::All, model.clone(), None);
        let echo = PlatformEvent::from_value(json!({
            "object": "page",
            "entry": [{ "messaging": [{
                "sender": { "id": "PAGE" },
                "message": { "mid": "m_out", "text": "our reply", "is_echo": true }
            }] }]
        }));

        let report = pipeline.ingest(None, echo).await;
        assert!(report.dispatch.is_none());
        assert!(model.calls().is_empty());
        assert_eq!(pipeline.ledger().usage().await.used, 1);
    }

    #[tokio::test]
    async fn capacity_holds_after_many_events() {
        let pipeline = pipeline(100, ContextWindow::All, FakeModel::text("x"), None);
        for n in 0..101 {
            pipeline
                .ingest(None, PlatformEvent::from_value(json!({ "n": n })))
                .await;
        }
        let snapshot = pipeline.ledger().snapshot().await;
        assert_eq!(snapshot.len(), 100);
        let head = match &snapshot[0].payload {
            EntryPayload::Event(event) => event.raw()["n"].as_u64(),
            EntryPayload::Text(_) => None,
        };
        assert_eq!(head, Some(100));
        assert!(snapshot.iter().all(|entry| match &entry.payload {
            EntryPayload::Event(event) => event.raw()["n"].as_u64() != Some(0),
            EntryPayload::Text(_) => true,
        }));
    }

    #[tokio::test]
    async fn eviction_runs_after_the_reply() {
        let model = FakeModel::text("answer");
        let sent = FakeChannel::new(FakeSend::Ok);
        let pipeline = pipeline(1, ContextWindow::All, model.clone(), channel(&sent));

        let report = pipeline.ingest(None, page_message(Some("PSID"), "hello")).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(sent.sent().len(), 1);
        assert!(model.calls()[0][0].content.ends_with("hello"));

        let snapshot = pipeline.ledger().snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, EntryRole::Assistant);
    }

    #[tokio::test]
    async fn latest_window_sends_a_single_turn() {
        let model = FakeModel::text("ok");
        let pipeline = pipeline(100, ContextWindow::Latest, model.clone(), None);
        pipeline.ingest(None, page_message(Some("PSID"), "one")).await;
        pipeline.ingest(None, page_message(Some("PSID"), "two")).await;

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 1);
        assert!(calls[1][0].content.ends_with("two"));
    }

    #[tokio::test]
    async fn all_window_replays_history_oldest_first() {
        let model = FakeModel::text("ok");
        let pipeline = pipeline(100, ContextWindow::All, model.clone(), None);
        pipeline.ingest(None, page_message(Some("PSID"), "one")).await;
        pipeline.ingest(None, page_message(Some("PSID"), "two")).await;

        let second_call = &model.calls()[1];
        let contents: Vec<&str> = second_call.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents.len(), 3);
        assert!(contents[0].ends_with("one"));
        assert!(contents[1].ends_with("ok"));
        assert!(contents[2].ends_with("two"));
    }

    #[tokio::test]
    async fn dropped_caller_does_not_skip_eviction() {
        let pipeline = pipeline_with_timeout(
            1,
            ContextWindow::All,
            FakeModel::new(FakeReply::Hang),
            None,
            Duration::from_millis(200),
        );
        pipeline
            .ingest(None, PlatformEvent::from_value(json!({ "n": 0 })))
            .await;
        assert_eq!(pipeline.ledger().usage().await.used, 1);

        let caller = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.ingest_to_completion(None, page_message(Some("PSID"), "hello")),
        )
        .await;
        assert!(caller.is_err(), "model hang should outlast the caller");
        assert_eq!(pipeline.ledger().usage().await.used, 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = pipeline.ledger().snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, EntryRole::User);
        assert_eq!(snapshot[0].arrival_order, 2);
    }

    #[tokio::test]
    async fn ingest_to_completion_returns_the_report() {
        let pipeline = pipeline(2, ContextWindow::All, FakeModel::text("ok"), None);
        let report = pipeline
            .ingest_to_completion(None, page_message(Some("PSID"), "hello"))
            .await
            .expect("report");
        assert_eq!(report.arrival_order, 1);
        assert_eq!(report.dispatch.as_ref().map(DispatchOutcome::label), Some("replied"));
        assert_eq!(pipeline.ledger().usage().await.used, 2);
    }
}

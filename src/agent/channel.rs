//! Per-conversation turn runner: gate + retrying client + delivery.

use crate::conversation::gate::ConversationGate;
use crate::conversation::history::MessageHistory;
use crate::error::{GateError, LlmError};
use crate::llm::client::{ChatMessage, CompletionClient};
use crate::llm::retry::RetryingClient;
use crate::messaging::Messenger;
use crate::{ConversationId, InboundMessage};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Reply sent when a second message arrives mid-turn.
const BUSY_NOTICE: &str =
    "I'm still working on the previous message in this conversation. Please wait a moment.";

/// Reply sent when an active turn is cancelled out of band.
const CANCELLED_NOTICE: &str = "Cancelled the current request.";

/// Drives conversation turns: one in-flight LLM call per conversation,
/// histories kept for the process lifetime, replies chunked to the
/// platform's message limit.
pub struct ChannelRunner<C: CompletionClient> {
    gate: ConversationGate,
    client: RetryingClient<C>,
    messenger: Arc<dyn Messenger>,
    histories: Mutex<HashMap<ConversationId, MessageHistory>>,
    system_prompt: String,
}

impl<C: CompletionClient + 'static> ChannelRunner<C> {
    pub fn new(
        client: RetryingClient<C>,
        messenger: Arc<dyn Messenger>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            gate: ConversationGate::new(),
            client,
            messenger,
            histories: Mutex::new(HashMap::new()),
            system_prompt: system_prompt.into(),
        }
    }

    /// Handle an inbound message on a spawned task so the caller's event
    /// loop is never blocked behind a long turn. Returns the task handle.
    pub fn handle_message(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.process(message).await;
        })
    }

    /// Cancel the conversation's active turn, if any.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        self.gate.cancel(conversation_id)
    }

    async fn process(&self, message: InboundMessage) {
        let conversation_id: ConversationId = Arc::from(message.conversation_id.as_str());

        let outcome = self
            .gate
            .run_exclusive(&conversation_id, |cancel| {
                self.run_turn(&conversation_id, &message, cancel)
            })
            .await;

        match outcome {
            Ok(Ok(reply)) => {
                if let Err(error) = self
                    .messenger
                    .send_chunked(&conversation_id, &reply)
                    .await
                {
                    tracing::error!(%conversation_id, %error, "failed to deliver reply");
                }
            }
            Ok(Err(LlmError::Cancelled)) => {
                tracing::info!(%conversation_id, "turn cancelled");
                self.notify(&conversation_id, CANCELLED_NOTICE).await;
            }
            Ok(Err(error)) => {
                tracing::error!(%conversation_id, %error, "turn failed");
                self.notify(
                    &conversation_id,
                    &format!("Something went wrong while handling that message: {error}"),
                )
                .await;
            }
            Err(GateError::Busy { .. }) => {
                tracing::debug!(%conversation_id, "rejected concurrent message");
                self.notify(&conversation_id, BUSY_NOTICE).await;
            }
        }
    }

    /// One gated turn: append the user message, run the completion, append
    /// the reply. Failed or cancelled turns roll history back to the
    /// pre-turn snapshot so no dangling user message poisons the next turn.
    async fn run_turn(
        &self,
        conversation_id: &ConversationId,
        message: &InboundMessage,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let (snapshot, len_before) = {
            let mut histories = self.histories.lock().expect("history lock poisoned");
            let history = histories
                .entry(conversation_id.clone())
                .or_insert_with(|| MessageHistory::with_system_prompt(&self.system_prompt));
            let len_before = history.len();
            history.push(ChatMessage::user(&*message.text));
            (history.clone(), len_before)
        };

        match self.client.complete(&snapshot, &cancel).await {
            Ok(reply) => {
                let mut histories = self.histories.lock().expect("history lock poisoned");
                if let Some(history) = histories.get_mut(conversation_id) {
                    history.push(ChatMessage::assistant(&*reply));
                }
                Ok(reply)
            }
            Err(error) => {
                let mut histories = self.histories.lock().expect("history lock poisoned");
                if let Some(history) = histories.get_mut(conversation_id) {
                    history.truncate(len_before);
                }
                Err(error)
            }
        }
    }

    async fn notify(&self, conversation_id: &ConversationId, text: &str) {
        if let Err(error) = self.messenger.send(conversation_id, text).await {
            tracing::warn!(%conversation_id, %error, "failed to deliver notice");
        }
    }

    #[cfg(test)]
    fn history_len(&self, conversation_id: &ConversationId) -> usize {
        self.histories
            .lock()
            .expect("history lock poisoned")
            .get(conversation_id)
            .map(MessageHistory::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, RetryConfig};
    use crate::error::MessagingError;
    use crate::llm::budget::TokenBudget;
    use crate::llm::client::CompletionRequest;
    use crate::llm::credentials::CredentialPool;
    use crate::llm::retry::SamplingParams;
    use std::time::Duration;

    /// Messenger that records everything it delivers.
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, String)>>,
        max_message_len: usize,
    }

    impl RecordingMessenger {
        fn new(max_message_len: usize) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                max_message_len,
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Messenger for RecordingMessenger {
        fn max_message_len(&self) -> usize {
            self.max_message_len
        }

        async fn send(
            &self,
            conversation_id: &ConversationId,
            text: &str,
        ) -> Result<(), MessagingError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// Completion client that waits for a permit before answering, so tests
    /// can hold a turn open deliberately.
    struct GatedReplyClient {
        permits: tokio::sync::Semaphore,
        reply: ReplyKind,
    }

    enum ReplyKind {
        Text(String),
        Fatal,
        RateLimited,
    }

    impl GatedReplyClient {
        fn with_reply(reply: ReplyKind) -> Arc<Self> {
            Arc::new(Self {
                permits: tokio::sync::Semaphore::new(0),
                reply,
            })
        }

        fn replying(reply: &str) -> Arc<Self> {
            Self::with_reply(ReplyKind::Text(reply.to_string()))
        }

        fn failing() -> Arc<Self> {
            Self::with_reply(ReplyKind::Fatal)
        }

        fn rate_limited() -> Arc<Self> {
            Self::with_reply(ReplyKind::RateLimited)
        }

        fn release(&self) {
            self.permits.add_permits(1);
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for Arc<GatedReplyClient> {
        async fn complete(
            &self,
            _request: &CompletionRequest,
            _credential: &str,
        ) -> Result<String, LlmError> {
            let _permit = self.permits.acquire().await.expect("semaphore closed");
            match &self.reply {
                ReplyKind::Text(reply) => Ok(reply.clone()),
                ReplyKind::Fatal => Err(LlmError::Fatal("scripted failure".into())),
                ReplyKind::RateLimited => Err(LlmError::RateLimited {
                    retry_after: None,
                    message: "429".into(),
                }),
            }
        }
    }

    fn runner(
        client: Arc<GatedReplyClient>,
        messenger: Arc<RecordingMessenger>,
    ) -> Arc<ChannelRunner<Arc<GatedReplyClient>>> {
        let retrying = RetryingClient::new(
            client,
            Arc::new(CredentialPool::new(vec!["key".into()], 3).unwrap()),
            Arc::new(TokenBudget::new(ContextConfig::default())),
            RetryConfig {
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
                rotate_after_failures: 3,
                max_elapsed: Duration::from_secs(60),
            },
            SamplingParams {
                temperature: 0.7,
                max_tokens: 256,
            },
        );
        Arc::new(ChannelRunner::new(retrying, messenger, "be brief"))
    }

    fn inbound(conversation: &str, text: &str) -> InboundMessage {
        InboundMessage::new(conversation, "user-1", text)
    }

    #[tokio::test]
    async fn reply_is_delivered_and_history_grows() {
        let client = GatedReplyClient::replying("the answer");
        let messenger = RecordingMessenger::new(2000);
        let runner = runner(Arc::clone(&client), Arc::clone(&messenger));

        client.release();
        runner
            .handle_message(inbound("room-1", "question?"))
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent, vec![("room-1".to_string(), "the answer".to_string())]);
        // system prompt + user + assistant
        assert_eq!(runner.history_len(&Arc::from("room-1")), 3);
    }

    #[tokio::test]
    async fn long_reply_is_chunked_to_platform_limit() {
        let reply = "word ".repeat(100);
        let client = GatedReplyClient::replying(&reply);
        let messenger = RecordingMessenger::new(60);
        let runner = runner(Arc::clone(&client), Arc::clone(&messenger));

        client.release();
        runner
            .handle_message(inbound("room-1", "talk a lot"))
            .await
            .unwrap();

        let sent = messenger.sent();
        assert!(sent.len() > 1);
        for (_, chunk) in &sent {
            assert!(chunk.chars().count() <= 60);
        }
        let reassembled: String = sent.into_iter().map(|(_, chunk)| chunk).collect();
        assert_eq!(reassembled, reply);
    }

    #[tokio::test]
    async fn concurrent_message_gets_busy_notice() {
        let client = GatedReplyClient::replying("slow answer");
        let messenger = RecordingMessenger::new(2000);
        let runner = runner(Arc::clone(&client), Arc::clone(&messenger));

        // First turn starts and blocks inside the completion call.
        let first = runner.handle_message(inbound("room-1", "first"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second message is rejected immediately, not queued.
        runner
            .handle_message(inbound("room-1", "second"))
            .await
            .unwrap();
        assert_eq!(messenger.sent(), vec![("room-1".to_string(), BUSY_NOTICE.to_string())]);

        // The first turn is unaffected.
        client.release();
        first.await.unwrap();
        let sent = messenger.sent();
        assert_eq!(sent.last().unwrap().1, "slow answer");
    }

    #[tokio::test]
    async fn failed_turn_reports_and_rolls_back_history() {
        let client = GatedReplyClient::failing();
        let messenger = RecordingMessenger::new(2000);
        let runner = runner(Arc::clone(&client), Arc::clone(&messenger));

        client.release();
        runner
            .handle_message(inbound("room-1", "doomed"))
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Something went wrong"));
        // User message rolled back; only the system prompt remains.
        assert_eq!(runner.history_len(&Arc::from("room-1")), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_turn_and_sends_notice() {
        // Every attempt rate-limits, so without cancellation the turn would
        // retry until the wall-clock ceiling.
        let client = GatedReplyClient::rate_limited();
        let messenger = RecordingMessenger::new(2000);
        let runner = runner(Arc::clone(&client), Arc::clone(&messenger));

        let turn = runner.handle_message(inbound("room-1", "long job"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(runner.cancel(&Arc::from("room-1")));
        // Unblock the in-flight call; the retry layer observes cancellation
        // before the next attempt, never mid-call.
        client.release();

        tokio::time::timeout(Duration::from_secs(5), turn)
            .await
            .expect("turn should finish after cancel")
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent, vec![("room-1".to_string(), CANCELLED_NOTICE.to_string())]);
        // Slot released: nothing left to cancel, and the user message was
        // rolled back.
        assert!(!runner.cancel(&Arc::from("room-1")));
        assert_eq!(runner.history_len(&Arc::from("room-1")), 1);
    }
}

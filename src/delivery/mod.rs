//! Notification delivery
//!
//! The dispatcher turns a formatted alert into per-recipient sends with
//! bounded retries. One bad recipient never blocks the others; the caller
//! gets an outcome per recipient instead of an error. A dev-mode override
//! swaps in a test recipient set, and a global switch disables sending
//! entirely while the rest of the pipeline still runs.

pub mod format;
pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::error::Result;

pub use telegram::TelegramClient;

/// A message accepted by the channel, with the ids needed for later edits
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
    pub chat: ChatRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRef {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

/// Inline keyboard with the single refresh affordance
///
/// After a refresh the button label carries the update time.
pub fn refresh_keyboard(updated_at: Option<&str>) -> InlineKeyboard {
    let text = match updated_at {
        Some(ts) => format!("Last updated at {}", ts),
        None => "Refresh".to_string(),
    };
    InlineKeyboard {
        inline_keyboard: vec![vec![InlineButton {
            text,
            callback_data: "refresh".to_string(),
        }]],
    }
}

/// Messaging-platform seam
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<SentMessage>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()>;
}

/// Result of one recipient's delivery attempt chain
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered {
        chat_id: i64,
        message: SentMessage,
        attempts: u32,
    },
    /// Send switch is off; pipeline ran, nothing left the process
    Skipped { chat_id: i64 },
    Failed {
        chat_id: i64,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Formats nothing, retries everything: per-recipient delivery engine
pub struct DeliveryDispatcher {
    messenger: Arc<dyn Messenger>,
    config: DeliveryConfig,
}

impl DeliveryDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, config: DeliveryConfig) -> Self {
        Self { messenger, config }
    }

    /// Active recipient set, honoring the dev-mode override
    pub fn recipients(&self) -> &[i64] {
        if self.config.dev_mode {
            &self.config.dev_recipients
        } else {
            &self.config.recipients
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver to every active recipient; never fails as a whole
    pub async fn deliver(
        &self,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Vec<DeliveryOutcome> {
        if self.config.dev_mode {
            debug!(recipients = ?self.recipients(), "Dev mode recipient override active");
        }

        let mut outcomes = Vec::with_capacity(self.recipients().len());
        for &chat_id in self.recipients() {
            if !self.config.send_enabled {
                debug!(chat_id, "Sending disabled, skipping recipient");
                outcomes.push(DeliveryOutcome::Skipped { chat_id });
                continue;
            }
            outcomes.push(self.send_with_retry(chat_id, text, markup).await);
        }
        outcomes
    }

    async fn send_with_retry(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> DeliveryOutcome {
        let max_attempts = self.config.max_send_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.messenger.send_message(chat_id, text, markup).await {
                Ok(message) => {
                    info!(chat_id, attempt, "Message delivered");
                    return DeliveryOutcome::Delivered {
                        chat_id,
                        message,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(chat_id, attempt, error = %e, "Send attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        // Linear backoff: attempt N waits N units
                        let wait = Duration::from_millis(
                            self.config.retry_unit_ms * u64::from(attempt),
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        error!(chat_id, attempts = max_attempts, "Recipient delivery exhausted");
        DeliveryOutcome::Failed {
            chat_id,
            attempts: max_attempts,
            reason: last_error,
        }
    }

    /// Edit a previously delivered message in place
    pub async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<()> {
        self.messenger
            .edit_message(chat_id, message_id, text, markup)
            .await
    }

    /// Acknowledge an inline-button press
    pub async fn ack_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        self.messenger.answer_callback(callback_id, text).await
    }

    /// Best-effort diagnostic to the operator chat; never propagates
    pub async fn report_error(&self, context: &str, detail: &str) {
        error!(context, detail, "Reported failure");

        if !self.config.send_enabled || self.config.operator_chat_id == 0 {
            return;
        }
        let text = format!(
            "Error: {}\n<pre>{}</pre>",
            format::escape_html(context),
            format::escape_html(detail)
        );
        if let Err(e) = self
            .messenger
            .send_message(self.config.operator_chat_id, &text, None)
            .await
        {
            warn!(error = %e, "Failed to reach operator chat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::Mutex;

    /// Messenger that fails a configurable number of times per chat
    #[derive(Default)]
    struct FlakyMessenger {
        fail_counts: HashMap<i64, u32>,
        attempts: Mutex<HashMap<i64, u32>>,
        next_message_id: AtomicI64,
    }

    impl FlakyMessenger {
        fn failing(chat_id: i64, failures: u32) -> Self {
            let mut fail_counts = HashMap::new();
            fail_counts.insert(chat_id, failures);
            Self {
                fail_counts,
                ..Default::default()
            }
        }

        async fn attempts_for(&self, chat_id: i64) -> u32 {
            *self.attempts.lock().await.get(&chat_id).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl Messenger for FlakyMessenger {
        async fn send_message(
            &self,
            chat_id: i64,
            _text: &str,
            _markup: Option<&InlineKeyboard>,
        ) -> Result<SentMessage> {
            let mut attempts = self.attempts.lock().await;
            let seen = attempts.entry(chat_id).or_insert(0);
            *seen += 1;

            let failures = self.fail_counts.get(&chat_id).copied().unwrap_or(0);
            if *seen <= failures {
                return Err(Error::Messaging("temporarily unavailable".into()));
            }

            Ok(SentMessage {
                message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
                chat: ChatRef { id: chat_id },
            })
        }

        async fn edit_message(
            &self,
            _chat_id: i64,
            _message_id: i64,
            _text: &str,
            _markup: Option<&InlineKeyboard>,
        ) -> Result<()> {
            Ok(())
        }

        async fn answer_callback(&self, _callback_id: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn config_with(recipients: Vec<i64>) -> DeliveryConfig {
        DeliveryConfig {
            recipients,
            retry_unit_ms: 1, // keep tests fast
            ..DeliveryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_exhausted_recipient_does_not_block_others() {
        let messenger = Arc::new(FlakyMessenger::failing(1, 10));
        let dispatcher = DeliveryDispatcher::new(messenger.clone(), config_with(vec![1, 2]));

        let outcomes = dispatcher.deliver("hello", None).await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0],
            DeliveryOutcome::Failed { chat_id: 1, attempts: 3, .. }
        ));
        assert!(outcomes[1].is_delivered());
        // Exactly max_send_attempts tries, then gave up
        assert_eq!(messenger.attempts_for(1).await, 3);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let messenger = Arc::new(FlakyMessenger::failing(1, 2));
        let dispatcher = DeliveryDispatcher::new(messenger.clone(), config_with(vec![1]));

        let outcomes = dispatcher.deliver("hello", None).await;

        match &outcomes[0] {
            DeliveryOutcome::Delivered { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_switch_skips_everything() {
        let messenger = Arc::new(FlakyMessenger::default());
        let mut config = config_with(vec![1, 2]);
        config.send_enabled = false;
        let dispatcher = DeliveryDispatcher::new(messenger.clone(), config);

        let outcomes = dispatcher.deliver("hello", None).await;

        assert!(outcomes
            .iter()
            .all(|o| matches!(o, DeliveryOutcome::Skipped { .. })));
        assert_eq!(messenger.attempts_for(1).await, 0);
    }

    #[tokio::test]
    async fn test_dev_mode_overrides_recipients() {
        let messenger = Arc::new(FlakyMessenger::default());
        let mut config = config_with(vec![1, 2, 3]);
        config.dev_mode = true;
        config.dev_recipients = vec![99];
        let dispatcher = DeliveryDispatcher::new(messenger.clone(), config);

        let outcomes = dispatcher.deliver("hello", None).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(messenger.attempts_for(99).await, 1);
        assert_eq!(messenger.attempts_for(1).await, 0);
    }

    #[test]
    fn test_refresh_keyboard_labels() {
        let fresh = refresh_keyboard(None);
        assert_eq!(fresh.inline_keyboard[0][0].text, "Refresh");

        let updated = refresh_keyboard(Some("12:30"));
        assert!(updated.inline_keyboard[0][0].text.contains("12:30"));
        assert_eq!(updated.inline_keyboard[0][0].callback_data, "refresh");
    }
}

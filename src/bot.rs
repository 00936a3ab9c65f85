//! Bot dispatcher: long-polls updates and routes them to capture, tagging and forwarding.
//!
//! Only admin operators get any response; everyone else is ignored and logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::{CaptureOutcome, CaptureService};
use crate::channels::telegram_types::{CallbackQuery, InlineKeyboardMarkup, Message, Update, User};
use crate::channels::TelegramApi;
use crate::error::{ChannelError, ForwardError};
use crate::forwarding::{CycleReport, ForwardingEngine};
use crate::store::{OperatorRegistry, Subscription};
use crate::tagging::{Button, CallbackAction, Prompt, TaggingWorkflow};

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const START_TEXT: &str = "Commands:\n\n\
/start - show this command list\n\
/forward - list forwarding channels and forward now\n\n\
Forward a channel post to this chat to store it under the channel's tag.\n\
Only admins can use this bot.";

/// Wires Telegram updates to the relay services.
pub struct RelayBot {
    api: TelegramApi,
    operators: Arc<dyn OperatorRegistry>,
    capture: CaptureService,
    workflow: Arc<TaggingWorkflow>,
    engine: Arc<ForwardingEngine>,
}

impl RelayBot {
    pub fn new(
        api: TelegramApi,
        operators: Arc<dyn OperatorRegistry>,
        capture: CaptureService,
        workflow: Arc<TaggingWorkflow>,
        engine: Arc<ForwardingEngine>,
    ) -> Self {
        Self {
            api,
            operators,
            capture,
            workflow,
            engine,
        }
    }

    /// Poll forever, handling updates one at a time.
    pub async fn run(&self) {
        let mut offset: i64 = 0;
        info!("Bot listening for updates...");

        loop {
            let updates = match self.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                // Advance offset past this update
                offset = offset.max(update.update_id + 1);
                self.handle_update(update).await;
            }
        }
    }

    /// Route a single update.
    pub async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            self.handle_callback(&query).await;
        } else if let Some(message) = update.message {
            self.handle_message(&message).await;
        }
    }

    async fn is_admin(&self, user: &User) -> bool {
        match self.operators.is_admin(user.id).await {
            Ok(true) => true,
            Ok(false) => {
                info!(user_id = user.id, name = user.display_name(), "Ignoring non-admin user");
                false
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Operator lookup failed");
                false
            }
        }
    }

    async fn handle_message(&self, message: &Message) {
        let Some(user) = &message.from else {
            return;
        };
        if !self.is_admin(user).await {
            return;
        }
        let chat_id = message.chat.id;

        if let Some(post) = message.channel_forward() {
            match self.capture.handle_forward(user.id, &post).await {
                Ok(CaptureOutcome::Stored { id, tag }) => {
                    debug!(id, tag = %tag, "Forward stored");
                }
                Ok(CaptureOutcome::PendingTag(decision)) => {
                    self.reply(chat_id, &decision.prompt).await;
                }
                Err(e) => {
                    warn!(origin_chat_id = post.origin_chat_id, error = %e, "Failed to store forward");
                    self.reply(chat_id, &plain(format!("Failed to store message: {e}")))
                        .await;
                }
            }
            return;
        }

        let Some(text) = message.text.as_deref() else {
            return;
        };

        match command(text) {
            Some("start") => self.reply(chat_id, &plain(START_TEXT)).await,
            Some("forward") => {
                let prompt = match self.engine.subscriptions().list_subscriptions().await {
                    Ok(subs) => subscription_listing(&subs),
                    Err(e) => {
                        warn!(error = %e, "Failed to list subscriptions");
                        plain(format!("Failed to list forwarding channels: {e}"))
                    }
                };
                self.reply(chat_id, &prompt).await;
            }
            Some(other) => debug!(command = other, "Unknown command"),
            None => match self.workflow.submit_tag(user.id, text).await {
                Ok(Some(decision)) => self.reply(chat_id, &decision.prompt).await,
                Ok(None) => debug!(user_id = user.id, "Ignoring free text"),
                Err(e) => self.reply(chat_id, &plain(e.to_string())).await,
            },
        }
    }

    async fn handle_callback(&self, query: &CallbackQuery) {
        if !self.is_admin(&query.from).await {
            return;
        }
        if let Err(e) = self.api.answer_callback_query(&query.id, None).await {
            warn!(error = %e, "Failed to answer callback query");
        }

        let data = query.data.as_deref().unwrap_or_default();
        let action = match CallbackAction::decode(data) {
            Ok(action) => action,
            Err(e) => {
                warn!(data, "Malformed callback data");
                self.update_prompt(query, &plain(e.to_string())).await;
                return;
            }
        };

        match action {
            CallbackAction::Tag { channel_id, action } => {
                let prompt = match self.workflow.decide(query.from.id, channel_id, action).await {
                    Ok(decision) => decision.prompt,
                    Err(e) => plain(e.to_string()),
                };
                self.update_prompt(query, &prompt).await;
            }
            CallbackAction::Forward { channel_id } => {
                self.update_prompt(query, &plain(format!("Forwarding to {channel_id}...")))
                    .await;
                // Off the poll loop; the summary replaces the prompt when done.
                let api = self.api.clone();
                let engine = self.engine.clone();
                let query = query.clone();
                tokio::spawn(async move {
                    let text = match engine.run_cycle(channel_id).await {
                        Ok(report) => cycle_summary(&report),
                        Err(ForwardError::Store(e)) => {
                            warn!(channel_id, error = %e, "Manual forwarding failed");
                            format!("Forwarding failed: {e}")
                        }
                        Err(e) => e.to_string(),
                    };
                    edit_prompt(&api, &query, &plain(text)).await;
                });
            }
        }
    }

    async fn reply(&self, chat_id: i64, prompt: &Prompt) {
        send_prompt(&self.api, chat_id, prompt).await;
    }

    async fn update_prompt(&self, query: &CallbackQuery, prompt: &Prompt) {
        edit_prompt(&self.api, query, prompt).await;
    }
}

async fn send_prompt(api: &TelegramApi, chat_id: i64, prompt: &Prompt) {
    let keyboard = InlineKeyboardMarkup::from_prompt(prompt);
    if let Err(e) = api
        .send_message(chat_id, &prompt.text, keyboard.as_ref())
        .await
    {
        warn!(chat_id, error = %e, "Failed to send reply");
    }
}

/// Edit the message carrying the pressed button, or reply if it is gone.
async fn edit_prompt(api: &TelegramApi, query: &CallbackQuery, prompt: &Prompt) {
    let Some(message) = &query.message else {
        send_prompt(api, query.from.id, prompt).await;
        return;
    };
    let keyboard = InlineKeyboardMarkup::from_prompt(prompt);
    match api
        .edit_message_text(
            message.chat.id,
            message.message_id,
            &prompt.text,
            keyboard.as_ref(),
        )
        .await
    {
        Ok(()) => {}
        Err(ChannelError::Api { description, .. })
            if description.contains("message is not modified") => {}
        Err(e) => warn!(chat_id = message.chat.id, error = %e, "Failed to edit prompt"),
    }
}

fn plain(text: impl Into<String>) -> Prompt {
    Prompt {
        text: text.into(),
        keyboard: Vec::new(),
    }
}

/// Command name of a `/command` or `/command@bot` message.
fn command(text: &str) -> Option<&str> {
    let word = text.split_whitespace().next()?.strip_prefix('/')?;
    Some(word.split('@').next().unwrap_or(word))
}

/// `/forward` listing: one line per subscription plus a button each.
pub fn subscription_listing(subs: &[Subscription]) -> Prompt {
    if subs.is_empty() {
        return plain("No forwarding channels configured.");
    }

    let mut text = String::from("Forwarding channels (name tag members batch):\n\n");
    let mut keyboard = Vec::with_capacity(subs.len());
    for sub in subs {
        let name = if sub.name.is_empty() {
            sub.channel_id.to_string()
        } else {
            sub.name.clone()
        };
        text.push_str(&format!(
            "{name} {} {} {}\n",
            sub.tag,
            sub.member_count.unwrap_or(0),
            sub.batch_size
        ));
        keyboard.push(vec![Button {
            label: format!("Forward {name}"),
            action: CallbackAction::Forward {
                channel_id: sub.channel_id,
            },
        }]);
    }

    Prompt {
        text: text.trim_end().to_string(),
        keyboard,
    }
}

/// Operator-facing summary of a manual cycle.
pub fn cycle_summary(report: &CycleReport) -> String {
    if report.attempted == 0 {
        return format!("No new \"{}\" messages for {}.", report.tag, report.channel_id);
    }
    let mut text = format!(
        "Forwarded {} message(s) to {}",
        report.delivered, report.channel_id
    );
    if report.skipped > 0 {
        text.push_str(&format!(", skipped {} undeliverable", report.skipped));
    }
    text.push('.');
    if let Some(halt) = &report.halted {
        text.push_str(&format!(" Stopped early: {halt}. Will retry next cycle."));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;

    fn sub(channel_id: i64, name: &str, members: Option<i64>) -> Subscription {
        Subscription {
            id: 1,
            channel_id,
            name: name.into(),
            channel_type: "channel".into(),
            tag: "news".into(),
            cursor: 0,
            batch_size: 2,
            member_count: members,
        }
    }

    fn report(attempted: usize, delivered: usize, skipped: usize) -> CycleReport {
        CycleReport {
            channel_id: -2001,
            tag: "news".into(),
            previous_cursor: 0,
            cursor: 0,
            attempted,
            delivered,
            skipped,
            halted: None,
        }
    }

    #[test]
    fn commands_are_parsed() {
        assert_eq!(command("/start"), Some("start"));
        assert_eq!(command("/forward@relay_bot now"), Some("forward"));
        assert_eq!(command("news"), None);
        assert_eq!(command("   "), None);
    }

    #[test]
    fn listing_has_line_and_button_per_subscription() {
        let prompt = subscription_listing(&[sub(-1, "Mirror", Some(120)), sub(-2, "", None)]);
        assert!(prompt.text.contains("Mirror news 120 2"));
        assert!(prompt.text.contains("-2 news 0 2"));
        assert_eq!(prompt.keyboard.len(), 2);
        assert_eq!(
            prompt.keyboard[0][0].action,
            CallbackAction::Forward { channel_id: -1 }
        );
        assert_eq!(prompt.keyboard[0][0].label, "Forward Mirror");
    }

    #[test]
    fn empty_listing() {
        let prompt = subscription_listing(&[]);
        assert!(prompt.keyboard.is_empty());
        assert!(prompt.text.contains("No forwarding channels"));
    }

    #[test]
    fn summaries() {
        assert!(cycle_summary(&report(0, 0, 0)).starts_with("No new \"news\""));
        assert_eq!(
            cycle_summary(&report(3, 2, 1)),
            "Forwarded 2 message(s) to -2001, skipped 1 undeliverable."
        );

        let mut halted = report(2, 1, 0);
        halted.halted = Some(DeliveryError::Transient {
            reason: "429".into(),
        });
        assert!(cycle_summary(&halted).contains("Will retry next cycle"));
    }
}

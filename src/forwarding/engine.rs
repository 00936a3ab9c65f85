//! Forwarding engine: per-subscription cursor replay.
//!
//! One cycle pulls the next batch past a subscription's cursor, delivers it in
//! ascending id order and advances the cursor over every resolved message.
//! A transient failure stops the batch so the failed message is retried first
//! on the next cycle; the cursor never moves past an unresolved message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, ForwardError};
use crate::forwarding::transport::{Content, Transport};
use crate::store::{ContentKind, MessageStore, SourceMessage, Subscription, SubscriptionRegistry};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single delivery attempt.
    pub delivery_timeout: Duration,
    /// Subscriptions processed at once by `run_all`.
    pub max_concurrent_cycles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
            max_concurrent_cycles: 4,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub channel_id: i64,
    pub tag: String,
    pub previous_cursor: i64,
    /// Cursor after the cycle.
    pub cursor: i64,
    pub attempted: usize,
    pub delivered: usize,
    /// Permanently undeliverable messages resolved without sending.
    pub skipped: usize,
    /// Transient failure that stopped the batch, if any.
    pub halted: Option<DeliveryError>,
}

impl CycleReport {
    fn start(sub: &Subscription) -> Self {
        Self {
            channel_id: sub.channel_id,
            tag: sub.tag.clone(),
            previous_cursor: sub.cursor,
            cursor: sub.cursor,
            attempted: 0,
            delivered: 0,
            skipped: 0,
            halted: None,
        }
    }

    pub fn advanced(&self) -> bool {
        self.cursor > self.previous_cursor
    }
}

/// Replays tagged messages into subscriber channels.
pub struct ForwardingEngine {
    messages: Arc<dyn MessageStore>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    /// Per-subscription tokens guarding the read-deliver-advance sequence.
    tokens: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ForwardingEngine {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            messages,
            subscriptions,
            transport,
            config,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscriptions(&self) -> &Arc<dyn SubscriptionRegistry> {
        &self.subscriptions
    }

    async fn token_for(&self, channel_id: i64) -> Arc<Mutex<()>> {
        self.tokens
            .lock()
            .await
            .entry(channel_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one forwarding cycle for the subscription of `channel_id`.
    ///
    /// Fails fast with `CycleInProgress` if another cycle for the same
    /// subscription is running.
    pub async fn run_cycle(&self, channel_id: i64) -> Result<CycleReport, ForwardError> {
        let token = self.token_for(channel_id).await;
        let _guard = token
            .try_lock_owned()
            .map_err(|_| ForwardError::CycleInProgress { channel_id })?;

        // Re-read under the token so the cursor is current.
        let sub = self
            .subscriptions
            .get_subscription(channel_id)
            .await?
            .ok_or(ForwardError::SubscriptionNotFound { channel_id })?;

        let mut report = CycleReport::start(&sub);
        let batch = self
            .messages
            .messages_for_tag(&sub.tag, sub.cursor, sub.batch_size)
            .await?;

        if batch.is_empty() {
            debug!(channel_id, tag = %sub.tag, cursor = sub.cursor, "No new messages");
            return Ok(report);
        }

        let mut candidate = sub.cursor;
        for message in &batch {
            report.attempted += 1;
            match self.deliver(channel_id, message).await {
                Ok(()) => {
                    report.delivered += 1;
                    candidate = message.id;
                }
                Err(e) if e.is_permanent() => {
                    warn!(channel_id, message_id = message.id, error = %e, "Message undeliverable, skipping");
                    report.skipped += 1;
                    candidate = message.id;
                }
                Err(e) => {
                    warn!(channel_id, message_id = message.id, error = %e, "Delivery failed, stopping batch");
                    report.halted = Some(e);
                    break;
                }
            }
        }

        if candidate > sub.cursor {
            if self.subscriptions.advance_cursor(channel_id, candidate).await? {
                report.cursor = candidate;
            }
            self.refresh_metadata(channel_id).await;
        }

        info!(
            channel_id,
            tag = %report.tag,
            cursor = report.cursor,
            attempted = report.attempted,
            delivered = report.delivered,
            skipped = report.skipped,
            halted = report.halted.is_some(),
            "Forwarding cycle finished"
        );
        Ok(report)
    }

    /// Run a cycle for every subscription, at most `max_concurrent_cycles` at once.
    pub async fn run_all(
        &self,
    ) -> Result<Vec<(i64, Result<CycleReport, ForwardError>)>, ForwardError> {
        let subs = self.subscriptions.list_subscriptions().await?;
        let limit = self.config.max_concurrent_cycles.max(1);

        let outcomes: Vec<_> = futures::stream::iter(subs)
            .map(|sub| async move { (sub.channel_id, self.run_cycle(sub.channel_id).await) })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (channel_id, outcome) in &outcomes {
            if let Err(e) = outcome {
                warn!(channel_id, error = %e, "Forwarding cycle failed");
            }
        }
        Ok(outcomes)
    }

    async fn deliver(&self, target: i64, message: &SourceMessage) -> Result<(), DeliveryError> {
        // An envelope without items is an album still being captured.
        if message.kind == ContentKind::MediaGroup && message.group_items.is_empty() {
            return Err(DeliveryError::Transient {
                reason: format!("album {} incomplete", message.id),
            });
        }
        let Some(content) = Content::from_message(message) else {
            return Err(DeliveryError::Permanent {
                reason: format!("message {} has nothing deliverable", message.id),
            });
        };

        match tokio::time::timeout(
            self.config.delivery_timeout,
            self.transport.deliver(target, &content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout)),
        }
    }

    /// Best-effort title and member count refresh. Failures are only logged.
    async fn refresh_metadata(&self, channel_id: i64) {
        let info = match tokio::time::timeout(
            self.config.delivery_timeout,
            self.transport.channel_info(channel_id),
        )
        .await
        {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(channel_id, error = %e, "Failed to fetch channel info");
                return;
            }
            Err(_) => {
                warn!(channel_id, "Timed out fetching channel info");
                return;
            }
        };

        if let Err(e) = self
            .subscriptions
            .update_subscription_metadata(channel_id, &info.title, info.member_count)
            .await
        {
            warn!(channel_id, error = %e, "Failed to store channel metadata");
        }
    }
}

/// Spawn a background task that runs every subscription on a fixed interval.
pub fn spawn_forward_ticker(
    engine: Arc<ForwardingEngine>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = engine.run_all().await {
                warn!(error = %e, "Failed to list subscriptions for forwarding");
            }
        }
    })
}

//! Alert evaluation engine
//!
//! One evaluation cycle runs the configured definitions sequentially:
//! fetch a transaction batch with the session credential, aggregate it,
//! select and enrich matches, then fan delivery out across matches and
//! recipients. A failed definition is reported to the operator and skipped;
//! only a missing session credential aborts the whole cycle. The webhook
//! path runs the same qualification tail against pushed activity events.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, ExclusionSet, TokenAggregate};
use crate::config::{AlertDefinition, Config};
use crate::delivery::{format, refresh_keyboard, DeliveryDispatcher, DeliveryOutcome, TelegramClient};
use crate::enrich::{EnrichmentCoordinator, ExplorerClient, HoneypotClient, SecurityClient};
use crate::error::Result;
use crate::provider::{CandlestickClient, TransactionRecord, TransactionSource, WalletStatsSource};
use crate::rules::{apply_wallet_filter, select_matches};
use crate::session::{FileSessionStore, SessionTokenManager};
use crate::store::{AlertStore, DeliveryRecord, FileAlertStore, TokenRow};
use crate::webhook::{activity_to_record, AddressActivityPayload, DedupStore, MemoryDedupStore};

/// Summary of one evaluation cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub definitions: usize,
    pub failed: usize,
    pub delivered: usize,
}

/// How an inbound webhook delivery was handled
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Webhook processing is disabled in config
    Ignored,
    /// Delivery id was already claimed; treated as success, no side effects
    Duplicate,
    Processed { delivered: usize },
}

pub struct AlertEngine {
    config: Arc<Config>,
    session: SessionTokenManager,
    source: Arc<dyn TransactionSource>,
    stats_source: Option<Arc<dyn WalletStatsSource>>,
    enricher: EnrichmentCoordinator,
    dispatcher: DeliveryDispatcher,
    store: Arc<dyn AlertStore>,
    dedup: Arc<dyn DedupStore>,
}

impl AlertEngine {
    /// Wire the engine from injected parts; tests supply mocks here
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        session: SessionTokenManager,
        source: Arc<dyn TransactionSource>,
        stats_source: Option<Arc<dyn WalletStatsSource>>,
        enricher: EnrichmentCoordinator,
        dispatcher: DeliveryDispatcher,
        store: Arc<dyn AlertStore>,
        dedup: Arc<dyn DedupStore>,
    ) -> Self {
        Self {
            config,
            session,
            source,
            stats_source,
            enricher,
            dispatcher,
            store,
            dedup,
        }
    }

    /// Build the production wiring from configuration
    pub async fn from_config(config: Arc<Config>) -> Result<Self> {
        let provider = Arc::new(CandlestickClient::new(config.provider.clone()));
        let session = SessionTokenManager::new(
            Arc::new(FileSessionStore::new(&config.session.cache_path)),
            provider.clone(),
        );

        let explorer: Option<Arc<dyn crate::enrich::ProvenanceSource>> =
            if config.enrichment.explorer_api_key.is_empty() {
                warn!("No explorer API key configured, token provenance disabled");
                None
            } else {
                Some(Arc::new(ExplorerClient::new(&config.enrichment)))
            };
        let enricher = EnrichmentCoordinator::new(
            explorer,
            Some(Arc::new(HoneypotClient::new(&config.enrichment))),
            Some(Arc::new(SecurityClient::new(&config.enrichment))),
            Some(provider.clone() as _),
            config.delivery.wallet_stats_limit,
        );

        let dispatcher = DeliveryDispatcher::new(
            Arc::new(TelegramClient::new(&config.telegram)),
            config.delivery.clone(),
        );
        let store = Arc::new(FileAlertStore::open(&config.server.store_path).await?);

        Ok(Self::new(
            config,
            session,
            provider.clone() as _,
            Some(provider as _),
            enricher,
            dispatcher,
            store,
            Arc::new(MemoryDedupStore::new()),
        ))
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher {
        &self.dispatcher
    }

    /// Verify a session credential is obtainable; used by the health check
    pub async fn session_probe(&self) -> Result<()> {
        self.session.get_valid_token().await.map(|_| ())
    }

    /// Run all configured definitions sequentially
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        info!(alerts = self.config.alerts.len(), "Running evaluation cycle");

        let token = match self.session.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                self.dispatcher
                    .report_error("Session unavailable, cycle aborted", &e.to_string())
                    .await;
                return Err(e);
            }
        };

        let mut report = CycleReport {
            definitions: self.config.alerts.len(),
            ..CycleReport::default()
        };

        for definition in &self.config.alerts {
            info!(alert = %definition.name, "Evaluating alert");
            match self.evaluate_definition(definition, &token).await {
                Ok(delivered) => report.delivered += delivered,
                Err(e) => {
                    report.failed += 1;
                    self.dispatcher
                        .report_error(
                            &format!("Alert \"{}\" failed", definition.name),
                            &e.to_string(),
                        )
                        .await;
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Evaluation cycle finished"
        );
        Ok(report)
    }

    async fn evaluate_definition(
        &self,
        definition: &AlertDefinition,
        token: &str,
    ) -> Result<usize> {
        let transactions = self
            .source
            .fetch_transactions(token, &definition.query)
            .await?;

        if transactions.is_empty() {
            debug!(alert = %definition.name, "No transactions in batch");
            return Ok(0);
        }

        self.qualify_and_deliver(definition, &transactions, token)
            .await
    }

    /// Shared tail of the poll and push paths:
    /// aggregate -> select -> enrich -> wallet filter -> deliver
    async fn qualify_and_deliver(
        &self,
        definition: &AlertDefinition,
        transactions: &[TransactionRecord],
        token: &str,
    ) -> Result<usize> {
        let exclusions = ExclusionSet::new(&definition.filter.excluded_tokens);
        let aggregates = aggregate(
            transactions,
            definition.filter.window_minutes,
            &exclusions,
            Utc::now(),
        );

        let mut matches = select_matches(aggregates, &definition.filter);
        if matches.is_empty() {
            debug!(alert = %definition.name, "No qualifying tokens");
            return Ok(0);
        }

        self.enricher.enrich(&mut matches, token).await;
        let matches = apply_wallet_filter(matches, definition.wallet_filter.as_ref());

        // Failures inside deliver_match are per-recipient and already
        // reported; the fan-out itself cannot fail
        let delivered: usize = join_all(
            matches
                .iter()
                .map(|aggregate| self.deliver_match(definition, aggregate)),
        )
        .await
        .into_iter()
        .sum();

        Ok(delivered)
    }

    async fn deliver_match(
        &self,
        definition: &AlertDefinition,
        aggregate: &TokenAggregate,
    ) -> usize {
        let stats_source = self.stats_source.clone();
        let profile_url =
            move |address: &str| stats_source.as_ref().and_then(|s| s.wallet_profile_url(address));

        let text = format::build_alert_message(
            definition,
            aggregate,
            &self.config.provider.base_url,
            self.config.delivery.max_table_rows,
            Utc::now(),
            &profile_url,
        );

        let markup = refresh_keyboard(None);
        let outcomes = self.dispatcher.deliver(&text, Some(&markup)).await;

        if let Err(e) = self
            .store
            .upsert_token(TokenRow {
                address: aggregate.address.clone(),
                name: aggregate.intel.name.clone(),
                symbol: Some(aggregate.symbol.clone()),
                contract_creation: aggregate.intel.created_at,
            })
            .await
        {
            warn!(token = %aggregate.address, error = %e, "Token upsert failed");
        }

        let mut delivered = 0;
        for outcome in outcomes {
            match outcome {
                DeliveryOutcome::Delivered { message, .. } => {
                    delivered += 1;
                    let record = DeliveryRecord {
                        alert_id: definition.id,
                        token_address: aggregate.address.clone(),
                        transactions: aggregate.transactions.clone(),
                        message_id: message.message_id,
                        chat_id: message.chat.id,
                    };
                    if let Err(e) = self.store.insert_delivery(record).await {
                        warn!(error = %e, "Delivery record insert failed");
                    }
                }
                DeliveryOutcome::Failed {
                    chat_id,
                    attempts,
                    reason,
                } => {
                    self.dispatcher
                        .report_error(
                            &format!("Delivery to {} failed after {} attempts", chat_id, attempts),
                            &reason,
                        )
                        .await;
                }
                DeliveryOutcome::Skipped { .. } => {}
            }
        }
        delivered
    }

    /// Handle one inbound push delivery
    ///
    /// The id is claimed before any other work so provider retries become
    /// no-op successes. Internal failures are reported out-of-band; the
    /// caller still answers the provider with success.
    pub async fn handle_webhook(&self, payload: AddressActivityPayload) -> WebhookDisposition {
        if !self.config.webhook.enabled {
            debug!("Webhook processing disabled");
            return WebhookDisposition::Ignored;
        }
        let Some(definition) = self.config.alert_by_id(self.config.webhook.alert_id) else {
            warn!(alert_id = self.config.webhook.alert_id, "Webhook alert not configured");
            return WebhookDisposition::Ignored;
        };

        let ttl = Duration::from_secs(self.config.webhook.dedup_ttl_hours * 3600);
        if !self.dedup.try_claim(&payload.id, ttl) {
            info!(id = %payload.id, "Duplicate webhook delivery, skipping");
            return WebhookDisposition::Duplicate;
        }

        let observed_at = Utc::now();
        let records: Vec<TransactionRecord> = payload
            .event
            .activity
            .iter()
            .filter_map(|entry| activity_to_record(entry, observed_at))
            .collect();

        info!(
            id = %payload.id,
            entries = payload.event.activity.len(),
            purchases = records.len(),
            "Processing webhook delivery"
        );

        if records.is_empty() {
            return WebhookDisposition::Processed { delivered: 0 };
        }

        // Wallet-stats enrichment needs a session token; its absence only
        // degrades the message, never drops the alert
        let token = match self.session.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                self.dispatcher
                    .report_error("Session unavailable for webhook enrichment", &e.to_string())
                    .await;
                String::new()
            }
        };

        match self.qualify_and_deliver(definition, &records, &token).await {
            Ok(delivered) => WebhookDisposition::Processed { delivered },
            Err(e) => {
                self.dispatcher
                    .report_error("Webhook evaluation failed", &e.to_string())
                    .await;
                WebhookDisposition::Processed { delivered: 0 }
            }
        }
    }

    /// Re-render a previously delivered alert in place
    ///
    /// Re-runs enrichment and formatting over the stored transaction
    /// snapshot; aggregation and matching are not repeated.
    pub async fn handle_refresh(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        let Some(record) = self.store.find_delivery(chat_id, message_id).await? else {
            warn!(chat_id, message_id, "No delivery record for refresh request");
            return Ok(false);
        };
        let Some(definition) = self.config.alert_by_id(record.alert_id) else {
            warn!(alert_id = record.alert_id, "Alert no longer configured");
            return Ok(false);
        };
        let Some(aggregate) = TokenAggregate::from_transactions(&record.transactions) else {
            warn!(chat_id, message_id, "Delivery record has no transactions");
            return Ok(false);
        };

        let token = match self.session.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Refreshing without session-backed enrichment");
                String::new()
            }
        };

        let mut matches = [aggregate];
        self.enricher.enrich(&mut matches, &token).await;

        let stats_source = self.stats_source.clone();
        let profile_url =
            move |address: &str| stats_source.as_ref().and_then(|s| s.wallet_profile_url(address));

        let text = format::build_alert_message(
            definition,
            &matches[0],
            &self.config.provider.base_url,
            self.config.delivery.max_table_rows,
            Utc::now(),
            &profile_url,
        );

        let updated_at = Utc::now().format("%H:%M UTC").to_string();
        self.dispatcher
            .edit(
                chat_id,
                message_id,
                &text,
                Some(&refresh_keyboard(Some(&updated_at))),
            )
            .await?;

        info!(chat_id, message_id, "Alert refreshed");
        Ok(true)
    }
}

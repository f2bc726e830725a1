//! Token metadata and delivery-record persistence
//!
//! The engine records what it delivered so a recipient can later ask for a
//! refresh: the stored transaction snapshot is immutable, so refresh only
//! re-runs enrichment and formatting, never aggregation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::provider::TransactionRecord;

/// Upserted token metadata row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRow {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub contract_creation: Option<DateTime<Utc>>,
}

/// Association between a sent notification and the match that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub alert_id: u32,
    pub token_address: String,
    pub transactions: Vec<TransactionRecord>,
    pub message_id: i64,
    pub chat_id: i64,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn upsert_token(&self, row: TokenRow) -> Result<()>;
    async fn insert_delivery(&self, record: DeliveryRecord) -> Result<()>;
    async fn find_delivery(&self, chat_id: i64, message_id: i64)
        -> Result<Option<DeliveryRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    tokens: HashMap<String, TokenRow>,
    deliveries: Vec<DeliveryRecord>,
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryAlertStore {
    state: RwLock<StoreState>,
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn upsert_token(&self, row: TokenRow) -> Result<()> {
        self.state
            .write()
            .await
            .tokens
            .insert(row.address.clone(), row);
        Ok(())
    }

    async fn insert_delivery(&self, record: DeliveryRecord) -> Result<()> {
        self.state.write().await.deliveries.push(record);
        Ok(())
    }

    async fn find_delivery(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<DeliveryRecord>> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .iter()
            .find(|r| r.chat_id == chat_id && r.message_id == message_id)
            .cloned())
    }
}

/// JSON-file-backed store; state is rewritten after each mutation
pub struct FileAlertStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileAlertStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("Failed to read store: {}", e)))?;
            serde_json::from_str(&data)
                .map_err(|e| Error::Store(format!("Failed to parse store: {}", e)))?
        } else {
            StoreState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    async fn save(&self, state: &StoreState) -> Result<()> {
        let data = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| Error::Store(format!("Failed to write store: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn upsert_token(&self, row: TokenRow) -> Result<()> {
        let mut state = self.state.write().await;
        state.tokens.insert(row.address.clone(), row);
        self.save(&state).await
    }

    async fn insert_delivery(&self, record: DeliveryRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.deliveries.push(record);
        self.save(&state).await
    }

    async fn find_delivery(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<DeliveryRecord>> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .iter()
            .find(|r| r.chat_id == chat_id && r.message_id == message_id)
            .cloned())
    }
}

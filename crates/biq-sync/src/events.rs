//! Progress events written by the orchestrator and drained by a transport.

use biq_core::RetailerDescriptor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SyncEvent {
    Progress(ProgressMessage),
    Done(SyncSummary),
    Failed(SyncFailure),
}

impl SyncEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub done: bool,
    pub success: bool,
    pub total_plans: usize,
    pub retailers: Vec<RetailerSyncResult>,
    pub next_cursor: Option<usize>,
    pub timestamp: DateTime<Utc>,
    pub session_started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub done: bool,
    pub success: bool,
    pub error: String,
}

impl SyncFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            done: true,
            success: false,
            error: error.into(),
        }
    }
}

/// Outcome for one retailer in one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetailerSyncResult {
    pub retailer: String,
    pub slug: String,
    pub scanned_plans: usize,
    pub scanned_pages: u32,
    pub new_count: usize,
    pub updated_count: usize,
    /// Unchanged plans.
    pub skipped_count: usize,
    pub deleted_count: usize,
    pub reactivated_count: usize,
    pub skipped_gas_count: usize,
    pub stored_count: usize,
    /// Of `stored_count`: rows inserted vs rows overwritten.
    pub inserted_count: usize,
    pub replaced_count: usize,
    pub failed_count: usize,
    pub to_fetch_count: usize,
    pub processed_from: usize,
    pub processed_to: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetailerSyncResult {
    pub fn for_retailer(retailer: &RetailerDescriptor) -> Self {
        Self {
            retailer: retailer.name.clone(),
            slug: retailer.slug.clone(),
            ..Self::default()
        }
    }
}

/// Write side of the progress channel. A closed receiver is ignored: work in flight runs to
/// completion even after the client stops reading.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<SyncEvent>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<SyncEvent>) -> Self {
        Self { tx }
    }

    pub async fn message(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "biq_sync::progress", "{message}");
        self.emit(SyncEvent::Progress(ProgressMessage { message })).await;
    }

    pub async fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event).await;
    }
}

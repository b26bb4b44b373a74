//! Append-only activity log.
//!
//! Every policy-relevant event lands here, correlated by transaction
//! hash. Records are persisted write-through; the durable copy keeps
//! the 50 most recent. Status updates only move a record toward a
//! terminal status and applying the same terminal status twice is a
//! no-op.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CoreError;
use crate::keystore::{keys, SecureStore};
use crate::types::{now_unix, ActivityKind, ActivityRecord, SignerMode, TxStatus};

/// Most recent records retained, in memory and on disk.
pub const MAX_RECORDS: usize = 50;

/// Fields supplied when appending a record; id and timestamp are
/// assigned by the log.
#[derive(Clone, Debug, Default)]
pub struct ActivityDraft {
    pub kind: Option<ActivityKind>,
    pub title: String,
    pub subtitle: Option<String>,
    pub tx_hash: Option<String>,
    pub signer_mode: Option<SignerMode>,
    pub signer_request_id: Option<String>,
    pub mobile_action_id: Option<String>,
    pub explorer_url: Option<String>,
}

impl ActivityDraft {
    pub fn new(kind: ActivityKind, title: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// A status transition keyed by transaction hash.
#[derive(Clone, Debug)]
pub struct StatusUpdate {
    pub status: TxStatus,
    pub execution_status: Option<String>,
    pub revert_reason: Option<String>,
}

struct ActivityState {
    records: Vec<ActivityRecord>,
    next_id: u64,
}

/// The activity log. Clone-cheap handle over shared state.
pub struct ActivityLog {
    store: Arc<dyn SecureStore>,
    state: RwLock<ActivityState>,
}

impl ActivityLog {
    /// Load the persisted log, or start empty.
    pub async fn load(store: Arc<dyn SecureStore>) -> Result<Self, CoreError> {
        let records: Vec<ActivityRecord> = match store.get(keys::ACTIVITY).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| CoreError::Internal(format!("activity log is corrupt: {e}")))?,
            None => Vec::new(),
        };
        let next_id = records.iter().map(|r| r.id + 1).max().unwrap_or(1);
        Ok(Self {
            store,
            state: RwLock::new(ActivityState { records, next_id }),
        })
    }

    /// Append a record with `status = pending` when it carries a tx
    /// hash, `unknown` otherwise irrelevant — non-transaction events
    /// are appended as already-succeeded facts.
    pub async fn append(&self, draft: ActivityDraft) -> Result<ActivityRecord, CoreError> {
        let mut state = self.state.write().await;
        let record = ActivityRecord {
            id: state.next_id,
            created_at: now_unix(),
            kind: draft.kind.unwrap_or(ActivityKind::PolicyUpdated),
            title: draft.title,
            subtitle: draft.subtitle,
            status: if draft.tx_hash.is_some() {
                TxStatus::Pending
            } else {
                TxStatus::Succeeded
            },
            tx_hash: draft.tx_hash,
            execution_status: None,
            revert_reason: None,
            signer_mode: draft.signer_mode,
            signer_request_id: draft.signer_request_id,
            mobile_action_id: draft.mobile_action_id,
            explorer_url: draft.explorer_url,
        };
        state.next_id += 1;
        state.records.push(record.clone());
        let overflow = state.records.len().saturating_sub(MAX_RECORDS);
        if overflow > 0 {
            state.records.drain(..overflow);
        }
        self.persist(&state.records).await?;
        Ok(record)
    }

    /// Apply a status update to the record with the given tx hash.
    ///
    /// Returns whether anything changed. Records already at a
    /// terminal status are never modified, which makes repeated
    /// terminal updates no-ops and forbids terminal → pending moves.
    pub async fn update_by_tx_hash(
        &self,
        tx_hash: &str,
        update: StatusUpdate,
    ) -> Result<bool, CoreError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.tx_hash.as_deref() == Some(tx_hash));
        let Some(record) = record else {
            return Ok(false);
        };
        if record.status.is_terminal() || record.status == update.status {
            return Ok(false);
        }
        record.status = update.status;
        record.execution_status = update.execution_status;
        record.revert_reason = update.revert_reason;
        record.kind = match (record.kind, update.status) {
            (ActivityKind::TransferSubmitted, TxStatus::Succeeded) => {
                ActivityKind::TransferSucceeded
            }
            (ActivityKind::TransferSubmitted, TxStatus::Reverted) => {
                ActivityKind::TransferReverted
            }
            (kind, _) => kind,
        };
        debug!(tx_hash, status = ?update.status, "activity record updated");
        self.persist(&state.records).await?;
        Ok(true)
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<ActivityRecord> {
        let state = self.state.read().await;
        let mut records = state.records.clone();
        records.reverse();
        records
    }

    /// Records still pending with a known transaction hash; the
    /// poller's work list.
    pub async fn pending_with_tx_hash(&self) -> Vec<ActivityRecord> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .filter(|r| r.status == TxStatus::Pending && r.tx_hash.is_some())
            .cloned()
            .collect()
    }

    async fn persist(&self, records: &[ActivityRecord]) -> Result<(), CoreError> {
        let json = serde_json::to_string(records)
            .map_err(|e| CoreError::Internal(format!("activity serialize failed: {e}")))?;
        self.store.set(keys::ACTIVITY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryStore;

    async fn log() -> ActivityLog {
        ActivityLog::load(Arc::new(MemoryStore::new()))
            .await
            .expect("load")
    }

    fn transfer_draft(tx_hash: &str) -> ActivityDraft {
        ActivityDraft {
            tx_hash: Some(tx_hash.to_string()),
            ..ActivityDraft::new(ActivityKind::TransferSubmitted, "Sent 1 USDC")
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_order_preserved() {
        let log = log().await;
        for i in 0..3 {
            log.append(ActivityDraft::new(
                ActivityKind::PolicyUpdated,
                format!("update {i}"),
            ))
            .await
            .expect("append");
        }
        let listed = log.list().await;
        assert_eq!(listed.len(), 3);
        // Newest first.
        assert!(listed[0].id > listed[1].id && listed[1].id > listed[2].id);
    }

    #[tokio::test]
    async fn terminal_update_is_idempotent() {
        let log = log().await;
        log.append(transfer_draft("0x123")).await.expect("append");

        let update = StatusUpdate {
            status: TxStatus::Succeeded,
            execution_status: Some("SUCCEEDED".into()),
            revert_reason: None,
        };
        assert!(log
            .update_by_tx_hash("0x123", update.clone())
            .await
            .expect("first update"));
        let after_first = log.list().await;

        assert!(!log
            .update_by_tx_hash("0x123", update)
            .await
            .expect("second update"));
        let after_second = log.list().await;
        assert_eq!(after_first[0].status, after_second[0].status);
        assert_eq!(after_first[0].kind, ActivityKind::TransferSucceeded);
    }

    #[tokio::test]
    async fn terminal_status_never_downgrades() {
        let log = log().await;
        log.append(transfer_draft("0xdead")).await.expect("append");
        log.update_by_tx_hash(
            "0xdead",
            StatusUpdate {
                status: TxStatus::Reverted,
                execution_status: Some("REVERTED".into()),
                revert_reason: Some("assert failed".into()),
            },
        )
        .await
        .expect("revert");

        assert!(!log
            .update_by_tx_hash(
                "0xdead",
                StatusUpdate {
                    status: TxStatus::Pending,
                    execution_status: None,
                    revert_reason: None,
                },
            )
            .await
            .expect("downgrade attempt"));
        assert_eq!(log.list().await[0].status, TxStatus::Reverted);
        assert_eq!(log.list().await[0].kind, ActivityKind::TransferReverted);
    }

    #[tokio::test]
    async fn capped_at_fifty_records() {
        let log = log().await;
        for i in 0..60 {
            log.append(ActivityDraft::new(
                ActivityKind::PolicyUpdated,
                format!("event {i}"),
            ))
            .await
            .expect("append");
        }
        let listed = log.list().await;
        assert_eq!(listed.len(), MAX_RECORDS);
        // Oldest entries were dropped.
        assert_eq!(listed.last().expect("oldest").title, "event 10");
    }

    #[tokio::test]
    async fn survives_reload_from_store() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        {
            let log = ActivityLog::load(store.clone()).await.expect("load");
            log.append(transfer_draft("0xaaa")).await.expect("append");
        }
        let log = ActivityLog::load(store).await.expect("reload");
        let listed = log.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tx_hash.as_deref(), Some("0xaaa"));
        // Ids continue from the persisted high-water mark.
        let record = log
            .append(ActivityDraft::new(ActivityKind::PolicyUpdated, "next"))
            .await
            .expect("append");
        assert!(record.id > listed[0].id);
    }
}

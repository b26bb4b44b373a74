//! Transaction status poller.
//!
//! A self-rescheduling loop that watches pending activity records and
//! folds receipt outcomes back into the log. Cycles only run while
//! the app is foregrounded and in live mode; a backgrounded app lets
//! the in-progress cycle finish and simply schedules no further one.
//! Receipt fetches run through a pool of at most three concurrent
//! requests, and a per-item failure is logged without aborting the
//! rest of the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::activity::{ActivityLog, StatusUpdate};
use crate::rpc::ChainProvider;
use crate::types::{now_unix, TxStatus};

/// Seconds between poll cycles.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Pending records older than this stop being polled.
pub const STALE_AFTER_SECS: i64 = 30 * 60;
/// Maximum receipt requests in flight per cycle.
pub const MAX_CONCURRENT_RECEIPTS: usize = 3;

/// Status poller over the activity log.
pub struct StatusPoller {
    provider: Arc<dyn ChainProvider>,
    activity: Arc<ActivityLog>,
    foreground: AtomicBool,
    live: AtomicBool,
    in_flight: AtomicBool,
}

/// Handle to a spawned polling loop. Cancelling lets the in-flight
/// cycle complete but schedules no further cycles.
pub struct PollerSubscription {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollerSubscription {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn join_handle(&self) -> &JoinHandle<()> {
        &self.handle
    }
}

impl StatusPoller {
    pub fn new(provider: Arc<dyn ChainProvider>, activity: Arc<ActivityLog>) -> Self {
        Self {
            provider,
            activity,
            foreground: AtomicBool::new(true),
            live: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Foreground / background transition from the shell.
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    /// Live (non-demo) mode gate.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    fn should_poll(&self) -> bool {
        self.foreground.load(Ordering::SeqCst) && self.live.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. Each iteration sleeps then polls, so
    /// cancellation takes effect at the next wakeup.
    pub fn spawn(self: Arc<Self>) -> PollerSubscription {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = tokio::spawn(async move {
            loop {
                sleep(POLL_INTERVAL).await;
                if flag.load(Ordering::SeqCst) {
                    debug!("status poller cancelled");
                    break;
                }
                if !self.should_poll() {
                    continue;
                }
                self.poll_once().await;
            }
        });
        PollerSubscription { cancelled, handle }
    }

    /// Run one poll cycle. Concurrent invocations are collapsed: if a
    /// cycle is already in flight this returns immediately.
    pub async fn poll_once(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("poll cycle already in flight, skipping");
            return;
        }

        let now = now_unix();
        let pending = self.activity.pending_with_tx_hash().await;
        debug!(count = pending.len(), "poll cycle start");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_RECEIPTS));
        let mut tasks = Vec::new();

        for record in pending {
            let tx_hash = record.tx_hash.clone().expect("filtered on tx hash");

            if now - record.created_at > STALE_AFTER_SECS {
                if let Err(e) = self
                    .activity
                    .update_by_tx_hash(
                        &tx_hash,
                        StatusUpdate {
                            status: TxStatus::Unknown,
                            execution_status: Some(
                                "no receipt observed within 30 minutes; polling stopped".into(),
                            ),
                            revert_reason: None,
                        },
                    )
                    .await
                {
                    warn!(%tx_hash, "stale transition failed: {e}");
                }
                continue;
            }

            let provider = self.provider.clone();
            let activity = self.activity.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                match provider.get_transaction_receipt(&tx_hash).await {
                    Ok(Some(receipt)) => {
                        let status = receipt.to_tx_status();
                        if status.is_terminal() {
                            if let Err(e) = activity
                                .update_by_tx_hash(
                                    &tx_hash,
                                    StatusUpdate {
                                        status,
                                        execution_status: receipt.execution_status,
                                        revert_reason: receipt.revert_reason,
                                    },
                                )
                                .await
                            {
                                warn!(%tx_hash, "status update failed: {e}");
                            }
                        }
                    }
                    Ok(None) => debug!(%tx_hash, "receipt not yet available"),
                    // Leave the record untouched; next cycle retries.
                    Err(e) => warn!(%tx_hash, "receipt fetch failed: {e}"),
                }
            }));
        }

        // All-settled: every task finishes or fails independently.
        for task in tasks {
            if let Err(e) = task.await {
                warn!("poll task panicked: {e}");
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        debug!("poll cycle complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityDraft;
    use crate::error::CoreError;
    use crate::keystore::{keys, MemoryStore, SecureStore};
    use crate::rpc::{InvokeTransactionV1, ReceiptStatus};
    use crate::types::ActivityKind;
    use starknet::core::types::FieldElement;
    use std::sync::atomic::AtomicUsize;

    /// Provider that records its peak receipt-fetch concurrency.
    struct CountingProvider {
        current: AtomicUsize,
        peak: AtomicUsize,
        result: Option<ReceiptStatus>,
    }

    impl CountingProvider {
        fn new(result: Option<ReceiptStatus>) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                result,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChainProvider for CountingProvider {
        async fn chain_id(&self) -> Result<FieldElement, CoreError> {
            unimplemented!("not used by the poller")
        }
        async fn call_contract(
            &self,
            _: FieldElement,
            _: FieldElement,
            _: Vec<FieldElement>,
        ) -> Result<Vec<FieldElement>, CoreError> {
            unimplemented!("not used by the poller")
        }
        async fn get_class_hash_at(&self, _: FieldElement) -> Result<FieldElement, CoreError> {
            unimplemented!("not used by the poller")
        }
        async fn get_nonce(&self, _: FieldElement) -> Result<FieldElement, CoreError> {
            unimplemented!("not used by the poller")
        }
        async fn get_transaction_receipt(
            &self,
            _: &str,
        ) -> Result<Option<ReceiptStatus>, CoreError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
        async fn estimate_invoke_fee(
            &self,
            _: &InvokeTransactionV1,
        ) -> Result<FieldElement, CoreError> {
            unimplemented!("not used by the poller")
        }
        async fn add_invoke_transaction(
            &self,
            _: &InvokeTransactionV1,
        ) -> Result<String, CoreError> {
            unimplemented!("not used by the poller")
        }
    }

    async fn pending_transfer(activity: &ActivityLog, tx_hash: &str) {
        activity
            .append(ActivityDraft {
                tx_hash: Some(tx_hash.to_string()),
                ..ActivityDraft::new(ActivityKind::TransferSubmitted, "transfer")
            })
            .await
            .expect("append");
    }

    #[tokio::test]
    async fn receipt_concurrency_is_bounded() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store).await.expect("load"));
        for i in 0..10 {
            pending_transfer(&activity, &format!("0x{i}")).await;
        }
        let provider = Arc::new(CountingProvider::new(None));
        let poller = StatusPoller::new(provider.clone(), activity);

        poller.poll_once().await;

        assert!(provider.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_RECEIPTS);
        assert!(provider.peak.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn succeeded_receipt_moves_record_to_terminal() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store).await.expect("load"));
        pending_transfer(&activity, "0xabc").await;

        let provider = Arc::new(CountingProvider::new(Some(ReceiptStatus {
            execution_status: Some("SUCCEEDED".into()),
            finality_status: Some("ACCEPTED_ON_L2".into()),
            revert_reason: None,
        })));
        let poller = StatusPoller::new(provider, activity.clone());
        poller.poll_once().await;

        assert_eq!(activity.list().await[0].status, TxStatus::Succeeded);
        assert!(activity.pending_with_tx_hash().await.is_empty());
    }

    #[tokio::test]
    async fn pending_receipt_leaves_record_alone() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store).await.expect("load"));
        pending_transfer(&activity, "0xabc").await;

        let provider = Arc::new(CountingProvider::new(None));
        let poller = StatusPoller::new(provider, activity.clone());
        poller.poll_once().await;

        assert_eq!(activity.list().await[0].status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn stale_records_become_unknown_and_stop_polling() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store.clone()).await.expect("load"));
        pending_transfer(&activity, "0xold").await;

        // Age the record past the cutoff directly in the store.
        let json = store.get(keys::ACTIVITY).await.expect("get").expect("json");
        let aged = json.replace(
            &format!("\"created_at\":{}", activity.list().await[0].created_at),
            &format!("\"created_at\":{}", now_unix() - STALE_AFTER_SECS - 60),
        );
        store.set(keys::ACTIVITY, &aged).await.expect("set");
        let activity = Arc::new(ActivityLog::load(store).await.expect("reload"));

        let provider = Arc::new(CountingProvider::new(None));
        let poller = StatusPoller::new(provider.clone(), activity.clone());
        poller.poll_once().await;

        let record = &activity.list().await[0];
        assert_eq!(record.status, TxStatus::Unknown);
        // No receipt was ever requested for the stale record.
        assert_eq!(provider.peak.load(Ordering::SeqCst), 0);

        // A second cycle has nothing to do.
        poller.poll_once().await;
        assert_eq!(provider.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn background_mode_skips_cycles() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store).await.expect("load"));
        pending_transfer(&activity, "0xabc").await;

        let provider = Arc::new(CountingProvider::new(None));
        let poller = Arc::new(StatusPoller::new(provider.clone(), activity));
        poller.set_foreground(false);
        assert!(!poller.should_poll());
        poller.set_foreground(true);
        poller.set_live(false);
        assert!(!poller.should_poll());
        poller.set_live(true);
        assert!(poller.should_poll());
    }
}

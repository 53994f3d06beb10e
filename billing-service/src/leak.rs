use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use water_client::domain::PushUser;

use crate::notifier::Notifier;
use crate::store::{StoreError, WaterStore};

/// Number of recent consumption samples examined per user.
const SAMPLE_WINDOW: i64 = 5;

/// Latest-to-baseline ratio above which a leak is suspected. A heuristic,
/// not a statistical model; equal values do not trigger.
const LEAK_RATIO: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LeakVerdict {
    pub latest: i64,
    pub baseline_avg: f64,
}

/// Ratio rule over consumption samples ordered newest first.
///
/// No verdict with fewer than two samples, or when the mean of the older
/// samples is not positive (a zero baseline has no meaningful ratio).
pub fn evaluate(samples: &[i64]) -> Option<LeakVerdict> {
    if samples.len() < 2 {
        return None;
    }

    let latest = samples[0];
    let baseline = &samples[1..];
    let baseline_avg = baseline.iter().sum::<i64>() as f64 / baseline.len() as f64;

    if baseline_avg <= 0.0 {
        return None;
    }
    if (latest as f64) > baseline_avg * LEAK_RATIO {
        Some(LeakVerdict {
            latest,
            baseline_avg,
        })
    } else {
        None
    }
}

/// Recurring batch scan over every user with a push destination.
///
/// Idempotent per invocation and side-effect-free when nothing is anomalous.
/// A failure evaluating one user never aborts the rest of the batch.
pub struct LeakDetector {
    store: Arc<dyn WaterStore>,
    notifier: Arc<Notifier>,
    concurrency: usize,
    cooldown: Option<Duration>,
    last_alerted: DashMap<i64, Instant>,
}

impl LeakDetector {
    pub fn new(
        store: Arc<dyn WaterStore>,
        notifier: Arc<Notifier>,
        concurrency: usize,
        cooldown: Option<Duration>,
    ) -> Self {
        Self {
            store,
            notifier,
            concurrency: concurrency.max(1),
            cooldown,
            last_alerted: DashMap::new(),
        }
    }

    pub async fn run_once(&self) {
        let users = match self.store.users_with_push_destination().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "leak detection: user selection failed");
                return;
            }
        };

        futures::stream::iter(users)
            .for_each_concurrent(self.concurrency, |user| async move {
                if let Err(e) = self.check_user(&user).await {
                    metrics::counter!("leak_check_errors_total").increment(1);
                    tracing::error!(
                        user_id = user.user_id,
                        error = %e,
                        "leak check failed, continuing with remaining users"
                    );
                }
            })
            .await;
    }

    async fn check_user(&self, user: &PushUser) -> Result<(), StoreError> {
        let samples = self
            .store
            .recent_consumption(user.user_id, SAMPLE_WINDOW)
            .await?;
        let values: Vec<i64> = samples.iter().map(|s| s.consumption).collect();

        let Some(verdict) = evaluate(&values) else {
            return Ok(());
        };

        if self.in_cooldown(user.user_id) {
            tracing::debug!(user_id = user.user_id, "leak alert suppressed by cooldown");
            return Ok(());
        }

        metrics::counter!("leak_alerts_total").increment(1);
        tracing::warn!(
            user_id = user.user_id,
            latest = verdict.latest,
            baseline_avg = verdict.baseline_avg,
            "leak suspected"
        );

        let body = format!(
            "Your latest consumption ({} cu.m.) is much higher than recent average ({:.1} cu.m.). Please check for leaks.",
            verdict.latest, verdict.baseline_avg
        );
        let data = serde_json::json!({
            "type": "leak_alert",
            "latest": verdict.latest,
            "avg": verdict.baseline_avg,
        });

        self.notifier
            .notify(&user.push_token, user.user_id, "Water Leak Alert", &body, data)
            .await;
        self.mark_alerted(user.user_id);

        Ok(())
    }

    fn in_cooldown(&self, user_id: i64) -> bool {
        let Some(cooldown) = self.cooldown else {
            return false;
        };
        self.last_alerted
            .get(&user_id)
            .is_some_and(|at| at.elapsed() < cooldown)
    }

    fn mark_alerted(&self, user_id: i64) {
        if self.cooldown.is_some() {
            self.last_alerted.insert(user_id, Instant::now());
        }
    }
}

/// Time-driven loop around the detector. Each run is bounded by
/// `run_timeout` so a hung push call cannot block subsequent runs; the token
/// stops the loop.
pub fn spawn(
    detector: Arc<LeakDetector>,
    interval: Duration,
    run_timeout: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so runs start one
        // full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("running leak detection");
                    if tokio::time::timeout(run_timeout, detector.run_once()).await.is_err() {
                        metrics::counter!("leak_run_timeouts_total").increment(1);
                        tracing::warn!(
                            timeout_secs = run_timeout.as_secs(),
                            "leak detection run timed out"
                        );
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("leak detection loop shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingGateway;
    use crate::store::{MemoryStore, NewReading};

    fn detector(
        cooldown: Option<Duration>,
    ) -> (Arc<LeakDetector>, Arc<RecordingGateway>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let notifier = Arc::new(Notifier::new(gateway.clone(), store.clone()));
        let detector = Arc::new(LeakDetector::new(store.clone(), notifier, 4, cooldown));
        (detector, gateway, store)
    }

    /// Oldest-first insert order so `values` reads back newest first.
    async fn seed_consumption(store: &MemoryStore, user_id: i64, oldest_first: &[i64]) {
        for &consumption in oldest_first {
            store
                .insert_reading(NewReading {
                    user_id,
                    device_id: 1,
                    raw_register_value: 0,
                    previous_register_value: 0,
                    consumption,
                })
                .await
                .unwrap();
        }
    }

    #[test]
    fn spike_above_threshold_is_a_leak() {
        let verdict = evaluate(&[100, 30, 30, 30, 30]).expect("leak suspected");
        assert_eq!(verdict.latest, 100);
        assert_eq!(verdict.baseline_avg, 30.0);
    }

    #[test]
    fn below_threshold_is_not_a_leak() {
        assert_eq!(evaluate(&[40, 30, 30, 30, 30]), None);
    }

    #[test]
    fn exactly_threshold_does_not_trigger() {
        // 45 == 30 * 1.5; the rule is strictly greater-than.
        assert_eq!(evaluate(&[45, 30, 30, 30, 30]), None);
    }

    #[test]
    fn a_single_sample_is_insufficient() {
        assert_eq!(evaluate(&[500]), None);
        assert_eq!(evaluate(&[]), None);
    }

    #[test]
    fn zero_baseline_gives_no_verdict() {
        assert_eq!(evaluate(&[100, 0, 0, 0]), None);
    }

    #[test]
    fn two_samples_are_enough() {
        assert!(evaluate(&[50, 20]).is_some());
    }

    #[tokio::test]
    async fn leaky_user_gets_one_alert_per_run() {
        let (detector, gateway, store) = detector(None);
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        seed_consumption(&store, 1, &[30, 30, 30, 30, 100]).await;

        detector.run_once().await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data["type"], "leak_alert");
        assert_eq!(sent[0].data["latest"], 100);
        assert_eq!(sent[0].data["avg"], 30.0);
        assert_eq!(store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn steady_consumption_is_side_effect_free() {
        let (detector, gateway, store) = detector(None);
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        seed_consumption(&store, 1, &[30, 30, 30, 30, 40]).await;

        detector.run_once().await;

        assert!(gateway.sent().is_empty());
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn users_without_push_destination_are_not_evaluated() {
        let (detector, gateway, store) = detector(None);
        seed_consumption(&store, 1, &[30, 30, 30, 30, 100]).await;

        detector.run_once().await;

        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn one_failing_user_does_not_abort_the_batch() {
        let (detector, gateway, store) = detector(None);
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        store.set_push_token(2, "ExponentPushToken[b]").await.unwrap();
        seed_consumption(&store, 2, &[30, 30, 30, 30, 100]).await;
        store.fail_consumption_for(1);

        detector.run_once().await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ExponentPushToken[b]");
    }

    #[tokio::test]
    async fn record_storage_failure_does_not_stop_the_loop() {
        let (detector, gateway, store) = detector(None);
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        store.set_push_token(2, "ExponentPushToken[b]").await.unwrap();
        seed_consumption(&store, 1, &[30, 30, 30, 30, 100]).await;
        seed_consumption(&store, 2, &[30, 30, 30, 30, 100]).await;
        store.fail_notification_inserts(true);

        detector.run_once().await;

        // Both alerts still went out; only the side records were lost.
        assert_eq!(gateway.sent().len(), 2);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn sustained_leak_realerts_every_run_by_default() {
        let (detector, gateway, store) = detector(None);
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        seed_consumption(&store, 1, &[30, 30, 30, 30, 100]).await;

        detector.run_once().await;
        detector.run_once().await;

        assert_eq!(gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alerts_when_configured() {
        let (detector, gateway, store) = detector(Some(Duration::from_secs(600)));
        store.set_push_token(1, "ExponentPushToken[a]").await.unwrap();
        seed_consumption(&store, 1, &[30, 30, 30, 30, 100]).await;

        detector.run_once().await;
        detector.run_once().await;

        assert_eq!(gateway.sent().len(), 1);
    }
}

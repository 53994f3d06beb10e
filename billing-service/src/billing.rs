use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::Duration;
use tokio::sync::Mutex;
use water_client::domain::{Bill, MeterReading};

use crate::store::{NewBill, NewReading, StoreError, WaterStore};

/// Tariff shared by every billing computation in a deployment version, in
/// monetary units per cubic meter.
pub const RATE_PER_CUBIC_METER: Decimal = dec!(15.0);

/// Meter registers carry five digits; values wrap at the source.
pub const MAX_REGISTER_VALUE: i64 = 99_999;

const BILLING_PERIOD_DAYS: i64 = 29;
const DUE_DAYS: i64 = 5;

#[derive(thiserror::Error, Debug)]
pub enum BillingError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The reading write succeeded but the bill write did not. The reading
    /// stays valid and unbilled; callers must not report full success.
    #[error("reading {reading_id} was stored but bill creation failed: {source}")]
    BillNotCreated {
        reading_id: i64,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone)]
pub struct BillingOutcome {
    pub reading: MeterReading,
    pub bill: Bill,
}

/// Consumption never goes negative: a register rollover or re-entered lower
/// value floors at zero.
pub fn consumption_delta(raw_value: i64, previous: i64) -> i64 {
    (raw_value - previous).max(0)
}

pub fn amount_for(consumption: i64) -> Decimal {
    Decimal::from(consumption) * RATE_PER_CUBIC_METER
}

pub fn bill_number(user_id: i64, reading_id: i64, year: i32) -> String {
    format!("BILL-{user_id}-{reading_id}-{year}")
}

fn bill_for(reading: &MeterReading) -> NewBill {
    NewBill {
        user_id: reading.user_id,
        reading_id: reading.reading_id,
        bill_number: bill_number(reading.user_id, reading.reading_id, reading.timestamp.year()),
        period_start: reading.timestamp - Duration::days(BILLING_PERIOD_DAYS),
        period_end: reading.timestamp,
        due_date: reading.timestamp + Duration::days(DUE_DAYS),
        amount_to_pay: amount_for(reading.consumption),
    }
}

/// Turns a raw register value into a persisted reading and a generated bill.
///
/// The read-last/insert-reading/insert-bill sequence for one meter runs
/// under a per-device async lock so two concurrent submissions cannot
/// observe the same previous register value.
pub struct BillingEngine {
    store: Arc<dyn WaterStore>,
    device_locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
}

impl BillingEngine {
    pub fn new(store: Arc<dyn WaterStore>) -> Self {
        Self {
            store,
            device_locks: DashMap::new(),
        }
    }

    fn device_lock(&self, user_id: i64, device_id: i64) -> Arc<Mutex<()>> {
        self.device_locks
            .entry((user_id, device_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn record_reading_and_bill(
        &self,
        user_id: i64,
        device_id: i64,
        raw_value: i64,
    ) -> Result<BillingOutcome, BillingError> {
        if user_id <= 0 || device_id <= 0 {
            return Err(BillingError::Validation(
                "user_id and device_id must be positive".into(),
            ));
        }
        if !(0..=MAX_REGISTER_VALUE).contains(&raw_value) {
            return Err(BillingError::Validation(format!(
                "reading_5digit must be within 0..={MAX_REGISTER_VALUE}"
            )));
        }

        let lock = self.device_lock(user_id, device_id);
        let _guard = lock.lock().await;

        let previous = self
            .store
            .last_reading(user_id, device_id)
            .await?
            .map(|r| r.raw_register_value)
            .unwrap_or(0);
        let consumption = consumption_delta(raw_value, previous);

        let reading = self
            .store
            .insert_reading(NewReading {
                user_id,
                device_id,
                raw_register_value: raw_value,
                previous_register_value: previous,
                consumption,
            })
            .await?;
        metrics::counter!("readings_recorded_total").increment(1);

        let bill = match self.store.insert_bill(bill_for(&reading)).await {
            Ok(bill) => bill,
            Err(source) => {
                metrics::counter!("bills_failed_total").increment(1);
                tracing::error!(
                    reading_id = reading.reading_id,
                    error = %source,
                    "reading stored without a bill"
                );
                return Err(BillingError::BillNotCreated {
                    reading_id: reading.reading_id,
                    source,
                });
            }
        };
        metrics::counter!("bills_created_total").increment(1);

        tracing::info!(
            user_id,
            device_id,
            consumption,
            bill_number = %bill.bill_number,
            "recorded reading and generated bill"
        );

        Ok(BillingOutcome { reading, bill })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use time::macros::datetime;

    fn engine_with_store() -> (BillingEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_start_time(
            datetime!(2025-03-01 00:00:00 UTC),
        ));
        (BillingEngine::new(store.clone()), store)
    }

    #[test]
    fn consumption_is_the_register_delta() {
        assert_eq!(consumption_delta(150, 100), 50);
        assert_eq!(consumption_delta(100, 0), 100);
    }

    #[test]
    fn consumption_floors_at_zero_on_rollover() {
        assert_eq!(consumption_delta(100, 150), 0);
        assert_eq!(consumption_delta(0, 99_999), 0);
    }

    #[test]
    fn amount_is_consumption_times_rate() {
        assert_eq!(amount_for(50), dec!(750.0));
        assert_eq!(amount_for(0), dec!(0));
    }

    #[test]
    fn bill_number_format() {
        assert_eq!(bill_number(7, 42, 2025), "BILL-7-42-2025");
    }

    #[tokio::test]
    async fn first_reading_has_zero_previous() {
        let (engine, _) = engine_with_store();

        let outcome = engine.record_reading_and_bill(1, 1, 100).await.unwrap();
        assert_eq!(outcome.reading.previous_register_value, 0);
        assert_eq!(outcome.reading.consumption, 100);
        assert_eq!(outcome.bill.amount_to_pay, dec!(1500.0));
    }

    #[tokio::test]
    async fn sequential_readings_chain_previous_values() {
        let (engine, _) = engine_with_store();

        let first = engine.record_reading_and_bill(1, 1, 100).await.unwrap();
        let second = engine.record_reading_and_bill(1, 1, 150).await.unwrap();

        assert_eq!(first.reading.consumption, 100);
        assert_eq!(second.reading.previous_register_value, 100);
        assert_eq!(second.reading.consumption, 50);
        assert_eq!(second.bill.amount_to_pay, dec!(750.0));
    }

    #[tokio::test]
    async fn devices_do_not_share_previous_values() {
        let (engine, _) = engine_with_store();

        engine.record_reading_and_bill(1, 1, 500).await.unwrap();
        let other_device = engine.record_reading_and_bill(1, 2, 300).await.unwrap();

        assert_eq!(other_device.reading.previous_register_value, 0);
        assert_eq!(other_device.reading.consumption, 300);
    }

    #[tokio::test]
    async fn meter_reset_bills_zero() {
        let (engine, _) = engine_with_store();

        engine.record_reading_and_bill(1, 1, 150).await.unwrap();
        let after_reset = engine.record_reading_and_bill(1, 1, 100).await.unwrap();

        assert_eq!(after_reset.reading.consumption, 0);
        assert_eq!(after_reset.bill.amount_to_pay, dec!(0));
    }

    #[tokio::test]
    async fn bill_dates_derive_from_the_reading_timestamp() {
        let (engine, _) = engine_with_store();

        let outcome = engine.record_reading_and_bill(1, 1, 100).await.unwrap();
        let ts = outcome.reading.timestamp;

        assert_eq!(outcome.bill.period_end, ts);
        assert_eq!(outcome.bill.period_start, ts - Duration::days(29));
        assert_eq!(outcome.bill.due_date, ts + Duration::days(5));
        assert_eq!(
            outcome.bill.bill_number,
            format!("BILL-1-{}-{}", outcome.reading.reading_id, ts.year())
        );
    }

    #[tokio::test]
    async fn bill_dates_cross_month_boundaries_exactly() {
        let store = Arc::new(MemoryStore::with_start_time(
            datetime!(2024-03-01 00:00:00 UTC),
        ));
        let engine = BillingEngine::new(store);

        // Clock ticks once on insert; the reading lands on 2024-03-01 00:00:01.
        let outcome = engine.record_reading_and_bill(1, 1, 100).await.unwrap();
        assert_eq!(
            outcome.bill.period_start,
            datetime!(2024-02-01 00:00:01 UTC)
        );
        assert_eq!(outcome.bill.due_date, datetime!(2024-03-06 00:00:01 UTC));
    }

    #[tokio::test]
    async fn out_of_range_register_values_are_rejected() {
        let (engine, store) = engine_with_store();

        let too_large = engine.record_reading_and_bill(1, 1, 100_000).await;
        let negative = engine.record_reading_and_bill(1, 1, -1).await;
        let bad_user = engine.record_reading_and_bill(0, 1, 10).await;

        assert!(matches!(too_large, Err(BillingError::Validation(_))));
        assert!(matches!(negative, Err(BillingError::Validation(_))));
        assert!(matches!(bad_user, Err(BillingError::Validation(_))));
        assert!(store.last_reading(1, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_bill_write_leaves_the_reading_and_is_distinct() {
        let (engine, store) = engine_with_store();
        store.fail_bill_inserts(true);

        let err = engine.record_reading_and_bill(1, 1, 100).await.unwrap_err();
        let reading = store.last_reading(1, 1).await.unwrap().expect("reading kept");

        assert!(
            matches!(err, BillingError::BillNotCreated { reading_id, .. } if reading_id == reading.reading_id)
        );
        assert!(store.bills().is_empty());
    }

    #[tokio::test]
    async fn concurrent_submissions_for_one_device_are_serialized() {
        let (engine, _) = engine_with_store();
        let engine = Arc::new(engine);

        let a = tokio::spawn({
            let engine = engine.clone();
            async move { engine.record_reading_and_bill(1, 1, 100).await.unwrap() }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            async move { engine.record_reading_and_bill(1, 1, 150).await.unwrap() }
        });

        let mut outcomes = vec![a.await.unwrap(), b.await.unwrap()];
        outcomes.sort_by_key(|o| o.reading.reading_id);

        // Whichever submission lost the race must have billed against the
        // winner's register value, never against the same previous value.
        assert_eq!(outcomes[0].reading.previous_register_value, 0);
        assert_eq!(
            outcomes[1].reading.previous_register_value,
            outcomes[0].reading.raw_register_value
        );
    }
}

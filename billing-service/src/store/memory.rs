use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use time::{Duration, OffsetDateTime};
use water_client::domain::{
    Bill, BillWithReading, ConsumptionSample, MeterReading, NotificationRecord, PushUser,
};

use super::{NewBill, NewReading, StoreError, WaterStore};

#[derive(Default)]
struct Inner {
    readings: Vec<MeterReading>,
    bills: Vec<Bill>,
    push_tokens: HashMap<i64, String>,
    notifications: Vec<NotificationRecord>,
    next_reading_id: i64,
    next_bill_id: i64,
    fail_bill_inserts: bool,
    fail_notification_inserts: bool,
    fail_consumption_for: HashSet<i64>,
    now: Option<OffsetDateTime>,
}

/// In-memory `WaterStore` used by tests.
///
/// Server timestamps are a logical clock advancing one second per inserted
/// reading, so ordering is deterministic. Failure switches make the
/// non-fatal-side-write and partial-failure paths testable deliberately
/// rather than by accident.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the logical clock's starting instant.
    pub fn with_start_time(start: OffsetDateTime) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().now = Some(start);
        store
    }

    /// Make every `insert_bill` fail until switched back off.
    pub fn fail_bill_inserts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_bill_inserts = fail;
    }

    /// Make every `insert_notification` fail until switched back off.
    pub fn fail_notification_inserts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_notification_inserts = fail;
    }

    /// Make `recent_consumption` fail for one user.
    pub fn fail_consumption_for(&self, user_id: i64) {
        self.inner.lock().unwrap().fail_consumption_for.insert(user_id);
    }

    /// Snapshot of stored notification records.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.inner.lock().unwrap().notifications.clone()
    }

    /// Snapshot of stored bills.
    pub fn bills(&self) -> Vec<Bill> {
        self.inner.lock().unwrap().bills.clone()
    }
}

impl Inner {
    fn tick(&mut self) -> OffsetDateTime {
        let next = self
            .now
            .map(|now| now + Duration::seconds(1))
            .unwrap_or_else(OffsetDateTime::now_utc);
        self.now = Some(next);
        next
    }
}

#[async_trait::async_trait]
impl WaterStore for MemoryStore {
    async fn last_reading(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<MeterReading>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .readings
            .iter()
            .filter(|r| r.user_id == user_id && r.device_id == device_id)
            .max_by_key(|r| (r.timestamp, r.reading_id))
            .cloned())
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<MeterReading, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_reading_id += 1;
        let timestamp = inner.tick();
        let row = MeterReading {
            reading_id: inner.next_reading_id,
            user_id: reading.user_id,
            device_id: reading.device_id,
            raw_register_value: reading.raw_register_value,
            previous_register_value: reading.previous_register_value,
            consumption: reading.consumption,
            timestamp,
        };
        inner.readings.push(row.clone());
        Ok(row)
    }

    async fn insert_bill(&self, bill: NewBill) -> Result<Bill, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_bill_inserts {
            return Err(StoreError::Unavailable("bill insert failed".into()));
        }
        inner.next_bill_id += 1;
        let row = Bill {
            bill_id: inner.next_bill_id,
            user_id: bill.user_id,
            reading_id: bill.reading_id,
            bill_number: bill.bill_number,
            period_start: bill.period_start,
            period_end: bill.period_end,
            due_date: bill.due_date,
            amount_to_pay: bill.amount_to_pay,
        };
        inner.bills.push(row.clone());
        Ok(row)
    }

    async fn recent_consumption(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_consumption_for.contains(&user_id) {
            return Err(StoreError::Unavailable(format!(
                "consumption fetch failed for user {user_id}"
            )));
        }
        let mut rows: Vec<_> = inner
            .readings
            .iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse((r.timestamp, r.reading_id)));
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|r| ConsumptionSample {
                consumption: r.consumption,
                timestamp: r.timestamp,
            })
            .collect())
    }

    async fn consumption_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .readings
            .iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        rows.sort_by_key(|r| (r.timestamp, r.reading_id));
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|r| ConsumptionSample {
                consumption: r.consumption,
                timestamp: r.timestamp,
            })
            .collect())
    }

    async fn bills_with_readings(
        &self,
        user_id: i64,
    ) -> Result<Vec<BillWithReading>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<BillWithReading> = inner
            .bills
            .iter()
            .filter(|b| b.user_id == user_id)
            .filter_map(|b| {
                let reading = inner
                    .readings
                    .iter()
                    .find(|r| r.reading_id == b.reading_id)?;
                Some(BillWithReading {
                    bill_number: b.bill_number.clone(),
                    period_start: b.period_start,
                    period_end: b.period_end,
                    due_date: b.due_date,
                    amount_to_pay: b.amount_to_pay,
                    previous_reading: reading.previous_register_value,
                    current_reading: reading.raw_register_value,
                    consumption: reading.consumption,
                })
            })
            .collect();
        rows.sort_by_key(|b| std::cmp::Reverse(b.period_end));
        Ok(rows)
    }

    async fn users_with_push_destination(&self) -> Result<Vec<PushUser>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut users: Vec<PushUser> = inner
            .push_tokens
            .iter()
            .filter(|(_, token)| !token.is_empty())
            .map(|(&user_id, token)| PushUser {
                user_id,
                push_token: token.clone(),
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        Ok(users)
    }

    async fn set_push_token(&self, user_id: i64, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.push_tokens.insert(user_id, token.to_string());
        Ok(true)
    }

    async fn insert_notification(&self, record: NotificationRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_notification_inserts {
            return Err(StoreError::Unavailable("notification insert failed".into()));
        }
        inner.notifications.push(record);
        Ok(())
    }
}

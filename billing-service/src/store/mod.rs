pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use water_client::domain::{
    Bill, BillWithReading, ConsumptionSample, MeterReading, NotificationRecord, PushUser,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fields of a reading not assigned by the store. `reading_id` and the
/// server-side `timestamp` come back on insert.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub user_id: i64,
    pub device_id: i64,
    pub raw_register_value: i64,
    pub previous_register_value: i64,
    pub consumption: i64,
}

#[derive(Debug, Clone)]
pub struct NewBill {
    pub user_id: i64,
    pub reading_id: i64,
    pub bill_number: String,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub due_date: OffsetDateTime,
    pub amount_to_pay: Decimal,
}

/// Persistence handle shared by the billing engine, the HTTP layer and the
/// leak detector. Injected everywhere so tests can substitute an in-memory
/// implementation; nothing in the service caches reading state.
#[async_trait::async_trait]
pub trait WaterStore: Send + Sync {
    /// Most recent reading for one meter.
    async fn last_reading(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<MeterReading>, StoreError>;

    /// Append a reading; the store assigns identity and timestamp.
    async fn insert_reading(&self, reading: NewReading) -> Result<MeterReading, StoreError>;

    /// Append a bill referencing an existing reading.
    async fn insert_bill(&self, bill: NewBill) -> Result<Bill, StoreError>;

    /// Up to `limit` consumption samples for a user, newest first.
    async fn recent_consumption(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError>;

    /// Up to `limit` consumption samples for a user, oldest first.
    async fn consumption_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError>;

    /// Bills joined with reading detail, newest period first.
    async fn bills_with_readings(&self, user_id: i64)
        -> Result<Vec<BillWithReading>, StoreError>;

    /// Users whose push destination is non-null and non-empty.
    async fn users_with_push_destination(&self) -> Result<Vec<PushUser>, StoreError>;

    /// Store a push destination token. Returns false when the user does not
    /// exist.
    async fn set_push_token(&self, user_id: i64, token: &str) -> Result<bool, StoreError>;

    /// Append a notification side record. Callers treat failure as
    /// non-fatal.
    async fn insert_notification(&self, record: NotificationRecord) -> Result<(), StoreError>;
}

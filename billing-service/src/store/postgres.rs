use sqlx::PgPool;

use water_client::db::{bill_queries, reading_queries, user_queries};
use water_client::domain::{
    Bill, BillWithReading, ConsumptionSample, MeterReading, NotificationRecord, PushUser,
};

use super::{NewBill, NewReading, StoreError, WaterStore};

/// Postgres-backed store. Selects delegate to the `water-client` query
/// modules; writes live here with the service that owns them.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WaterStore for PgStore {
    async fn last_reading(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<MeterReading>, StoreError> {
        Ok(reading_queries::last_reading(&self.pool, user_id, device_id).await?)
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<MeterReading, StoreError> {
        let row = sqlx::query_as::<_, MeterReading>(
            r#"
            INSERT INTO water_consumption
                (user_id, device_id, raw_register_value, previous_register_value, consumption)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING reading_id, user_id, device_id, raw_register_value,
                      previous_register_value, consumption, timestamp
            "#,
        )
        .bind(reading.user_id)
        .bind(reading.device_id)
        .bind(reading.raw_register_value)
        .bind(reading.previous_register_value)
        .bind(reading.consumption)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert_bill(&self, bill: NewBill) -> Result<Bill, StoreError> {
        let row = sqlx::query_as::<_, Bill>(
            r#"
            INSERT INTO water_bills
                (user_id, reading_id, bill_number, period_start, period_end, due_date, amount_to_pay)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING bill_id, user_id, reading_id, bill_number,
                      period_start, period_end, due_date, amount_to_pay
            "#,
        )
        .bind(bill.user_id)
        .bind(bill.reading_id)
        .bind(&bill.bill_number)
        .bind(bill.period_start)
        .bind(bill.period_end)
        .bind(bill.due_date)
        .bind(bill.amount_to_pay)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn recent_consumption(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError> {
        Ok(reading_queries::recent_consumption(&self.pool, user_id, limit).await?)
    }

    async fn consumption_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ConsumptionSample>, StoreError> {
        Ok(reading_queries::consumption_history(&self.pool, user_id, limit).await?)
    }

    async fn bills_with_readings(
        &self,
        user_id: i64,
    ) -> Result<Vec<BillWithReading>, StoreError> {
        Ok(bill_queries::bills_with_readings(&self.pool, user_id).await?)
    }

    async fn users_with_push_destination(&self) -> Result<Vec<PushUser>, StoreError> {
        Ok(user_queries::users_with_push_destination(&self.pool).await?)
    }

    async fn set_push_token(&self, user_id: i64, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET expo_push_token = $1 WHERE user_id = $2")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_notification(&self, record: NotificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notifications (user_id, title, body, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.user_id)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use sqlx::PgPool;

use crate::domain::{ConsumptionSample, MeterReading};

/// Fetch the most recent reading for a single meter, if any.
///
/// Ties on `timestamp` are broken by `reading_id` so the answer is stable
/// for same-instant inserts.
pub async fn last_reading(
    pool: &PgPool,
    user_id: i64,
    device_id: i64,
) -> Result<Option<MeterReading>, sqlx::Error> {
    sqlx::query_as::<_, MeterReading>(
        r#"
        SELECT
            reading_id,
            user_id,
            device_id,
            raw_register_value,
            previous_register_value,
            consumption,
            timestamp
        FROM water_consumption
        WHERE user_id = $1
          AND device_id = $2
        ORDER BY timestamp DESC, reading_id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(device_id)
    .fetch_optional(pool)
    .await
}

/// Most recent consumption samples for a user, newest first. Leak detection
/// input.
pub async fn recent_consumption(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ConsumptionSample>, sqlx::Error> {
    sqlx::query_as::<_, ConsumptionSample>(
        r#"
        SELECT consumption, timestamp
        FROM water_consumption
        WHERE user_id = $1
        ORDER BY timestamp DESC, reading_id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Consumption history for a user, oldest first. Dashboard input.
pub async fn consumption_history(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ConsumptionSample>, sqlx::Error> {
    sqlx::query_as::<_, ConsumptionSample>(
        r#"
        SELECT consumption, timestamp
        FROM water_consumption
        WHERE user_id = $1
        ORDER BY timestamp ASC, reading_id ASC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

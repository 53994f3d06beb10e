use sqlx::PgPool;

use crate::domain::BillWithReading;

/// All bills for a user joined with the generating reading, newest billing
/// period first.
pub async fn bills_with_readings(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<BillWithReading>, sqlx::Error> {
    sqlx::query_as::<_, BillWithReading>(
        r#"
        SELECT
            wb.bill_number,
            wb.period_start,
            wb.period_end,
            wb.due_date,
            wb.amount_to_pay,
            wc.previous_register_value AS previous_reading,
            wc.raw_register_value AS current_reading,
            wc.consumption
        FROM water_bills wb
        JOIN water_consumption wc ON wb.reading_id = wc.reading_id
        WHERE wb.user_id = $1
        ORDER BY wb.period_end DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

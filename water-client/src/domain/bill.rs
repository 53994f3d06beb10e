use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

/// A monetary charge generated from exactly one reading.
///
/// The back-reference to the generating reading is permanent. Amounts are
/// decimal, never binary floats.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Bill {
    pub bill_id: i64,
    pub user_id: i64,
    pub reading_id: i64,
    pub bill_number: String,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub amount_to_pay: Decimal,
}

/// A bill joined with the detail of the reading that generated it, in the
/// shape served to clients.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillWithReading {
    pub bill_number: String,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub amount_to_pay: Decimal,
    pub previous_reading: i64,
    pub current_reading: i64,
    pub consumption: i64,
}

use serde::Serialize;
use time::OffsetDateTime;

/// One submitted meter register value and its derived consumption.
///
/// Immutable once written. `raw_register_value` is the 5-digit register as
/// reported by the meter; `consumption` is the floor-at-zero delta against
/// the previous register value for the same (user, device).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MeterReading {
    pub reading_id: i64,
    pub user_id: i64,
    pub device_id: i64,
    pub raw_register_value: i64,
    pub previous_register_value: i64,
    pub consumption: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A consumption value with the server-assigned time it was recorded.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ConsumptionSample {
    pub consumption: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

use serde::Serialize;

/// A user selected for leak evaluation: push destination is non-null and
/// non-empty.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PushUser {
    pub user_id: i64,
    pub push_token: String,
}

/// Best-effort side record of a dispatched alert. Its absence never aborts
/// the alert pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

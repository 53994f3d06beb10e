use sqlx::PgPool;

use crate::domain::PushUser;

/// Every user with a registered push destination.
pub async fn users_with_push_destination(pool: &PgPool) -> Result<Vec<PushUser>, sqlx::Error> {
    sqlx::query_as::<_, PushUser>(
        r#"
        SELECT user_id, expo_push_token AS push_token
        FROM users
        WHERE expo_push_token IS NOT NULL
          AND expo_push_token <> ''
        ORDER BY user_id
        "#,
    )
    .fetch_all(pool)
    .await
}

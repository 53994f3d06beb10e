use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use water_client::domain::NotificationRecord;

use crate::store::WaterStore;

const PUSH_TOKEN_PREFIX: &str = "ExponentPushToken";

/// Local shape check for a push destination. Tokens that fail it are
/// rejected without a network call.
pub fn is_valid_push_token(token: &str) -> bool {
    token.starts_with(PUSH_TOKEN_PREFIX)
}

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("push gateway request failed: {0}")]
    Request(String),

    #[error("push gateway rejected the message: status {0}")]
    Rejected(u16),
}

/// Message posted to the push gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

#[async_trait::async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError>;
}

/// Expo push gateway client: a single bounded POST per message, no retries.
pub struct ExpoGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl ExpoGateway {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl PushGateway for ExpoGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}

/// Best-effort alert delivery: invalid tokens skip the network entirely, a
/// failed delivery is logged and dropped (at-most-once), and the side record
/// write never propagates a failure to the caller.
pub struct Notifier {
    gateway: Arc<dyn PushGateway>,
    store: Arc<dyn WaterStore>,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn PushGateway>, store: Arc<dyn WaterStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn notify(&self, token: &str, user_id: i64, title: &str, body: &str, data: Value) {
        if !is_valid_push_token(token) {
            metrics::counter!("push_invalid_token_total").increment(1);
            tracing::warn!(user_id, "invalid push token, skipping delivery");
            return;
        }

        let message = PushMessage {
            to: token.to_string(),
            sound: "default".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.clone(),
        };

        if let Err(e) = self.gateway.send(&message).await {
            metrics::counter!("push_delivery_failed_total").increment(1);
            tracing::error!(user_id, error = %e, "push delivery failed, dropping");
            return;
        }
        metrics::counter!("push_delivered_total").increment(1);
        tracing::info!(user_id, "push notification delivered");

        // Side record only for delivered alerts. The notifications table may
        // be missing entirely; that must never reach the caller.
        let record = NotificationRecord {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            data,
        };
        if let Err(e) = self.store.insert_notification(record).await {
            metrics::counter!("notification_store_failed_total").increment(1);
            tracing::warn!(user_id, error = %e, "could not store notification record");
        }
    }
}

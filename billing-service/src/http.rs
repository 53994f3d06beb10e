use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::billing::{BillingEngine, BillingError};
use crate::store::{StoreError, WaterStore};

/// Maximum samples returned by the consumption history endpoint.
const CONSUMPTION_HISTORY_LIMIT: i64 = 12;

pub struct AppState {
    pub engine: BillingEngine,
    pub store: Arc<dyn WaterStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/add-reading", post(add_reading))
        .route("/water-bills/:user_id", get(water_bills))
        .route("/consumption/:user_id", get(consumption))
        .route("/register-push-token", post(register_push_token))
        .fallback(not_found)
        .with_state(state)
}

/// JSON error envelope. Validation maps to 400, missing entities to 404 and
/// store failures to a generic 500 with the detail kept server-side.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            BillingError::NotFound(message) => Self {
                status: StatusCode::NOT_FOUND,
                message,
            },
            BillingError::Persistence(e) => {
                tracing::error!(error = %e, "persistence failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "server error".to_string(),
                }
            }
            // Not full success and not silent: the reading survived without
            // a bill, and the caller is told exactly that.
            BillingError::BillNotCreated { reading_id, source } => {
                tracing::error!(reading_id, error = %source, "bill write failed after reading write");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: format!(
                        "reading {reading_id} was stored but the bill could not be created"
                    ),
                }
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::Persistence(err).into()
    }
}

#[derive(Deserialize)]
struct AddReadingRequest {
    user_id: i64,
    device_id: i64,
    reading_5digit: i64,
}

#[derive(Serialize)]
struct AddReadingResponse {
    bill_number: String,
    previous_reading: i64,
    current_reading: i64,
    consumption: i64,
    amount_to_pay: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    due_date: OffsetDateTime,
}

async fn add_reading(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddReadingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .engine
        .record_reading_and_bill(req.user_id, req.device_id, req.reading_5digit)
        .await?;

    let data = AddReadingResponse {
        bill_number: outcome.bill.bill_number,
        previous_reading: outcome.reading.previous_register_value,
        current_reading: outcome.reading.raw_register_value,
        consumption: outcome.reading.consumption,
        amount_to_pay: outcome.bill.amount_to_pay,
        period_start: outcome.bill.period_start,
        period_end: outcome.bill.period_end,
        due_date: outcome.bill.due_date,
    };

    Ok(Json(json!({
        "success": true,
        "message": "Reading and bill added successfully",
        "data": data,
    })))
}

async fn water_bills(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let bills = state.store.bills_with_readings(user_id).await?;
    Ok(Json(json!({ "success": true, "data": bills })))
}

async fn consumption(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let samples = state
        .store
        .consumption_history(user_id, CONSUMPTION_HISTORY_LIMIT)
        .await?;
    Ok(Json(json!({ "success": true, "data": samples })))
}

#[derive(Deserialize)]
struct RegisterPushTokenRequest {
    user_id: i64,
    expo_push_token: String,
}

async fn register_push_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterPushTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.expo_push_token.is_empty() {
        return Err(BillingError::Validation("expo_push_token must not be empty".into()).into());
    }

    let updated = state
        .store
        .set_push_token(req.user_id, &req.expo_push_token)
        .await?;
    if !updated {
        return Err(BillingError::NotFound(format!("no user {}", req.user_id)).into());
    }

    Ok(Json(json!({
        "success": true,
        "message": "Push token registered successfully",
    })))
}

async fn not_found() -> Response {
    let body = Json(json!({ "success": false, "message": "Endpoint not found" }));
    (StatusCode::NOT_FOUND, body).into_response()
}

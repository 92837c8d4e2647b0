//! Checkout saga endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::{CheckoutRequest, CheckoutResult, CheckoutSaga};
use chrono::{DateTime, Utc};
use common::{CheckoutId, ReservationId};
use inventory::ProductCatalog;
use serde::Serialize;
use store::{OutboxStore, Reservation, ReservationStore, SagaLog};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStatusResponse {
    pub checkout_id: CheckoutId,
    pub state: String,
    pub version: i64,
    pub cart_id: Option<String>,
    pub reservation_id: Option<ReservationId>,
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub failure_reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&CheckoutSaga> for CheckoutStatusResponse {
    fn from(saga: &CheckoutSaga) -> Self {
        Self {
            checkout_id: saga.checkout_id(),
            state: saga.state().to_string(),
            version: saga.version().as_i64(),
            cart_id: saga.cart_id().map(String::from),
            reservation_id: saga.reservation_id(),
            order_id: saga.order_id().map(String::from),
            order_number: saga.order_number().map(String::from),
            failure_reason: saga.failure_reason().map(String::from),
            updated_at: saga.updated_at(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmedResponse {
    pub reservation_id: ReservationId,
    pub status: &'static str,
    pub reservation: Reservation,
}

/// POST /checkout: runs the checkout saga.
#[tracing::instrument(skip(state, req), fields(cart_id = %req.cart_id))]
pub async fn create<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResult>), ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let result = state.orchestrator.process_checkout(req).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /checkout/{id}: returns checkout status from the durable log.
#[tracing::instrument(skip(state))]
pub async fn get<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutStatusResponse>, ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let checkout_id: CheckoutId = parse_id(&id, "checkout id")?;
    let saga = state.orchestrator.get_checkout(checkout_id).await?;
    Ok(Json(CheckoutStatusResponse::from(&saga)))
}

/// POST /checkout/{id}/confirm-payment: commits the checkout's reservation.
#[tracing::instrument(skip(state))]
pub async fn confirm_payment<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentConfirmedResponse>, ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let reservation_id: ReservationId = parse_id(&id, "reservation id")?;
    let reservation = state.orchestrator.confirm_payment(reservation_id).await?;
    Ok(Json(PaymentConfirmedResponse {
        reservation_id,
        status: "confirmed",
        reservation,
    }))
}

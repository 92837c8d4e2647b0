//! Raw reservation ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ProductId, ReservationId, VariantId};
use inventory::{ProductCatalog, ReservationHandle};
use serde::{Deserialize, Serialize};
use store::{OutboxStore, Reservation, ReservationItem, ReservationStore, SagaLog};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub items: Vec<ReservationItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub variant_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub reservation_id: ReservationId,
    pub status: &'static str,
    pub reservation: Reservation,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub available: i64,
    pub reserved: i64,
}

// -- Handlers --

/// POST /inventory/reserve: holds stock for every item or none.
#[tracing::instrument(skip(state, req), fields(lines = req.items.len()))]
pub async fn reserve<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationHandle>), ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let handle = state.orchestrator.ledger().reserve(req.items).await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

/// POST /inventory/reserve/{id}/confirm: commits a reservation.
#[tracing::instrument(skip(state))]
pub async fn confirm<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let reservation_id: ReservationId = parse_id(&id, "reservation id")?;
    let reservation = state.orchestrator.ledger().confirm(reservation_id).await?;
    Ok(Json(ReservationResponse {
        reservation_id,
        status: "confirmed",
        reservation,
    }))
}

/// DELETE /inventory/reserve/{id}: releases a reservation.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let reservation_id: ReservationId = parse_id(&id, "reservation id")?;
    let reservation = state.orchestrator.ledger().cancel(reservation_id).await?;
    Ok(Json(ReservationResponse {
        reservation_id,
        status: "released",
        reservation,
    }))
}

/// GET /inventory/{id}/availability: returns available and reserved quantity.
pub async fn availability<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    let product_id = ProductId::from(id.as_str());
    let variant_id = query
        .variant_id
        .filter(|v| !v.trim().is_empty())
        .map(|v| VariantId::from(v.as_str()));

    let ledger = state.orchestrator.ledger();
    let available = ledger
        .get_available_quantity(&product_id, variant_id.as_ref())
        .await?;
    let reserved = ledger
        .get_reserved_quantity(&product_id, variant_id.as_ref())
        .await?;

    Ok(Json(AvailabilityResponse {
        product_id,
        variant_id,
        available,
        reserved,
    }))
}

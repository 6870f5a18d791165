//! Seller endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use common::OrderId;
use domain::OrderStatus;
use serde::Deserialize;

use super::orders::{OrderResponse, PageResponse};
use super::{PageParams, parse_id};
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// GET /seller/orders: orders containing products of the caller's store.
#[tracing::instrument(skip(state, params))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(seller_id): CurrentUser,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<PageResponse<OrderResponse>>, ApiError> {
    let Query(params) = params?;

    let page = state
        .services
        .orders
        .list_seller_orders(seller_id, params.into())
        .await?;
    Ok(Json(page.into()))
}

/// PATCH /seller/orders/{id}/status: move an order one step along the fulfilment path.
#[tracing::instrument(skip(state, body))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(seller_id): CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Json(req) = body?;
    let order_id: OrderId = parse_id(&id, "order id")?;
    let target: OrderStatus = req.status.trim().to_ascii_lowercase().parse()?;

    let order = state
        .services
        .orders
        .advance(seller_id, order_id, target)
        .await?;
    Ok(Json(order.into()))
}

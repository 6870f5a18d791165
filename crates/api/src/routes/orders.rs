//! Buyer order endpoints: checkout, queries and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::CheckoutRequest;
use common::{OrderId, Page};
use domain::{Money, Order, OrderLine, Payment};
use serde::{Deserialize, Serialize};

use super::{PageParams, parse_id};
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub shipping_address: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub total_amount: Money,
    pub shipping_address: String,
    pub lines: Vec<OrderLineResponse>,
    pub payment: Option<PaymentResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub method: String,
    pub status: String,
    pub amount: Money,
    pub paid_at: Option<String>,
}

#[derive(Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
}

impl From<&OrderLine> for OrderLineResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal: line.subtotal(),
        }
    }
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            method: payment.method,
            status: payment.status.as_str().to_string(),
            amount: payment.amount,
            paid_at: payment.paid_at.map(|at| at.to_rfc3339()),
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status.as_str().to_string(),
            total_amount: order.total_amount,
            lines: order.lines.iter().map(OrderLineResponse::from).collect(),
            shipping_address: order.shipping_address,
            payment: order.payment.map(PaymentResponse::from),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

impl From<Page<Order>> for PageResponse<OrderResponse> {
    fn from(page: Page<Order>) -> Self {
        let total_pages = page.total_pages();
        let page = page.map(OrderResponse::from);
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages,
        }
    }
}

// -- Handlers --

/// POST /orders/checkout: turn the caller's cart into an order.
#[tracing::instrument(skip(state, body))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = body?;

    let request =
        CheckoutRequest::new(user_id, req.shipping_address).with_timeout(state.checkout_timeout);
    let order = state.services.checkout.checkout(request).await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<PageResponse<OrderResponse>>, ApiError> {
    let Query(params) = params?;

    let page = state
        .services
        .orders
        .list_orders(user_id, params.into())
        .await?;
    Ok(Json(page.into()))
}

/// GET /orders/{id}: one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order id")?;

    let order = state.services.orders.get_order(user_id, order_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel one of the caller's orders and return its stock.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order id")?;

    let order = state.services.orders.cancel(user_id, order_id).await?;
    Ok(Json(order.into()))
}

//! Buyer cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::ProductId;
use domain::{Cart, Money};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub total: Money,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
    pub subtotal: Money,
    pub image_url: String,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        let total = cart.total();
        Self {
            user_id: cart.user_id.to_string(),
            items: cart
                .items
                .into_iter()
                .map(|item| CartItemResponse {
                    product_id: item.product_id.to_string(),
                    subtotal: item.subtotal(),
                    name: item.name,
                    price: item.price,
                    quantity: item.quantity,
                    image_url: item.image_url,
                })
                .collect(),
            total,
            updated_at: cart.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// GET /cart: the caller's cart, possibly empty.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.services.carts.get_cart(user_id).await?;
    Ok(Json(cart.into()))
}

/// POST /cart/items: add a product, merging with an existing line.
#[tracing::instrument(skip(state, body))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<AddItemRequest>, JsonRejection>,
) -> Result<Json<CartResponse>, ApiError> {
    let Json(req) = body?;
    let product_id: ProductId = parse_id(&req.product_id, "product_id")?;

    let cart = state
        .services
        .carts
        .add_item(user_id, product_id, req.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// PUT /cart/items/{product_id}: set a line's quantity.
#[tracing::instrument(skip(state, body))]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<String>,
    body: Result<Json<UpdateItemRequest>, JsonRejection>,
) -> Result<Json<CartResponse>, ApiError> {
    let Json(req) = body?;
    let product_id: ProductId = parse_id(&product_id, "product_id")?;

    let cart = state
        .services
        .carts
        .update_item(user_id, product_id, req.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// DELETE /cart/items/{product_id}: remove a line.
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id: ProductId = parse_id(&product_id, "product_id")?;

    let cart = state.services.carts.remove_item(user_id, product_id).await?;
    Ok(Json(cart.into()))
}

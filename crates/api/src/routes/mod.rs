//! HTTP handlers.

pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod seller;

use std::str::FromStr;

use common::PageRequest;
use serde::Deserialize;

use crate::error::ApiError;

/// `?page=&per_page=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<PageParams> for PageRequest {
    fn from(params: PageParams) -> Self {
        PageRequest::new(params.page.unwrap_or(0), params.per_page.unwrap_or(0))
    }
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what} format: {e}")))
}

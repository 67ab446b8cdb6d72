pub mod account;
pub mod appointments;
pub mod catalog;
pub mod health;
pub mod promotions;
pub mod vouchers;
pub mod wizard;

use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::ApiResponse;

/// Result of every JSON handler.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

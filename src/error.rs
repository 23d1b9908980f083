use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::entitlements::{EntitlementDenial, PlanTierError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Entitlement(#[from] EntitlementDenial),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PlanTierError> for AppError {
    fn from(err: PlanTierError) -> Self {
        AppError::Forbidden(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::Entitlement(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::InvalidSignature => StatusCode::BAD_REQUEST,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::engine::dispatcher::Superseded;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("run superseded by a newer run in the same session")]
    Superseded,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Superseded => "superseded",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Superseded => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

impl From<Superseded> for EngineError {
    fn from(_: Superseded) -> Self {
        Self::Superseded
    }
}

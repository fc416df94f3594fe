use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::validation::Violation;

/// Error response for the HTTP API
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ErrorBody {
    Errors { errors: Vec<String> },
    Error { error: &'static str },
}

impl ApiError {
    /// Client error listing one message per problem
    pub(crate) fn bad_request(errors: Vec<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::Errors { errors },
        }
    }

    pub(crate) fn validation(violations: Vec<Violation>) -> Self {
        Self::bad_request(violations.into_iter().map(|v| v.message.to_string()).collect())
    }

    /// Generic server failure; details stay in the logs
    pub(crate) fn internal() -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody::Error {
                error: "internal server error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

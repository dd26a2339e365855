use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::host::HostError;

/// Error half of every handler: a status code plus the `{"error": "..."}`
/// body the service answers with.
#[derive(Debug)]
pub struct MistralServerError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    error: String,
}

pub type ServerResult<T, E = MistralServerError> = Result<T, E>;

impl MistralServerError {
    pub fn internal(message: impl Into<String>) -> Self {
        MistralServerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse {
                error: message.into(),
            },
        }
    }
}

impl IntoResponse for MistralServerError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

/// The handler boundary: `NotReady` is the retryable case and maps to 503,
/// everything else is a server-side fault.
impl From<HostError> for MistralServerError {
    fn from(err: HostError) -> Self {
        let status = match err {
            HostError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            HostError::Initialization(_) | HostError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        MistralServerError {
            status,
            message: HttpErrorResponse {
                error: err.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for MistralServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        MistralServerError::internal(format!("Generation task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_maps_to_service_unavailable() {
        let err = MistralServerError::from(HostError::NotReady);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        let body = serde_json::to_value(&err.message).unwrap();
        assert_eq!(body["error"], "Model not initialized");
    }

    #[test]
    fn generation_failures_map_to_internal_server_error() {
        let err =
            MistralServerError::from(HostError::Generation(anyhow::anyhow!("Cannot encode prompt")));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_value(&err.message).unwrap();
        assert_eq!(body["error"], "Text generation failed: Cannot encode prompt");
    }

    #[test]
    fn response_carries_the_given_status() {
        let res = MistralServerError::from(HostError::NotReady).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! HTTP error handling
//!
//! Every reply, success or failure, carries the uniform response envelope.
//! Only the status code differs, derived from the error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response as AxumResponse},
};
use dbgate_core::{ErrorKind, GatewayError, Response, Status};

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::StatementFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Dispatcher reply mapped onto an HTTP status
#[derive(Debug)]
pub struct CommandReply(pub Response);

impl IntoResponse for CommandReply {
    fn into_response(self) -> AxumResponse {
        let status = match (self.0.status, self.0.kind) {
            (Status::Success, _) => StatusCode::OK,
            (Status::Error, Some(kind)) => status_for(kind),
            (Status::Error, None) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0)).into_response()
    }
}

/// Failure raised by the transport before the command reaches the core
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: Response,
}

impl HttpError {
    /// Shared secret missing or wrong
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: Response {
                status: Status::Error,
                data: None,
                message: Some("invalid apikey".to_string()),
                kind: None,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        Self {
            status: status_for(err.kind()),
            body: Response::error(&err),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> AxumResponse {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_distinct_status() {
        let kinds = [
            ErrorKind::BadRequest,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::EngineUnavailable,
            ErrorKind::StatementFailed,
            ErrorKind::Internal,
        ];
        let mut statuses: Vec<u16> = kinds.iter().map(|k| status_for(*k).as_u16()).collect();
        statuses.sort_unstable();
        statuses.dedup();
        assert_eq!(statuses, vec![400, 404, 409, 422, 500, 503]);
    }

    #[test]
    fn test_gateway_error_keeps_kind_and_message() {
        let err = HttpError::from(GatewayError::conflict("key exists: a"));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.body.kind, Some(ErrorKind::Conflict));
        assert_eq!(err.body.message.as_deref(), Some("key exists: a"));
    }
}

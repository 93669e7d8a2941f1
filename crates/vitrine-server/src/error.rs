//! Mapping of control-plane errors onto HTTP responses

use std::fmt::{Display, Formatter};

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use vitrine_common::VitrineError;

use crate::model::response;

/// Local wrapper so `VitrineError` can implement actix-web's `ResponseError`
#[derive(Debug)]
pub struct AppError {
    inner: VitrineError,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<VitrineError> for AppError {
    fn from(value: VitrineError) -> Self {
        AppError { inner: value }
    }
}

impl AppError {
    pub fn inner(&self) -> &VitrineError {
        &self.inner
    }
}

pub fn status_of(error: &VitrineError) -> StatusCode {
    match error {
        VitrineError::NotFound(_) => StatusCode::NOT_FOUND,
        VitrineError::AlreadyExists(_) | VitrineError::IllegalState(_) => StatusCode::CONFLICT,
        VitrineError::Validation(_) => StatusCode::BAD_REQUEST,
        VitrineError::NotRunning(_) => StatusCode::SERVICE_UNAVAILABLE,
        VitrineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl actix_web::error::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        status_of(&self.inner)
    }

    fn error_response(&self) -> HttpResponse {
        response::Result::<String>::http_response(
            self.status_code().as_u16(),
            self.inner.error_code().code,
            self.inner.to_string(),
            String::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (VitrineError::NotFound("exhibit 'x'".into()), 404),
            (VitrineError::AlreadyExists("x".into()), 409),
            (VitrineError::IllegalState("x".into()), 409),
            (VitrineError::Validation("x".into()), 400),
            (VitrineError::NotRunning("x".into()), 503),
            (VitrineError::Timeout("x".into()), 504),
            (VitrineError::Fatal("x".into()), 500),
            (VitrineError::Cancelled, 500),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status_code().as_u16(), status);
        }
    }

    #[test]
    fn test_error_response_carries_code() {
        let response = AppError::from(VitrineError::NotFound("exhibit 'x'".into())).error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! HTTP-boundary error type. Internal layers keep their own thiserror
//! enums; anything that crosses an axum handler converts into `AppError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::TicketError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Ticket(TicketError::SubjectIneligible(_)) => StatusCode::FORBIDDEN,
            AppError::Ticket(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Ticket(TicketError::SubjectIneligible(_)) => "SUBJECT_INELIGIBLE",
            AppError::Ticket(_) => "TICKET_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message sent to the client. 5xx detail is masked in production;
    /// auth and eligibility messages are already client-safe.
    fn client_message(&self) -> String {
        if self.status().is_server_error() && is_production() {
            match self {
                AppError::Ticket(_) => "Ticket issuance failed".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        }
    }
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    matches!(
        std::env::var("RUN_MODE").as_deref(),
        Ok("production") | Ok("prod")
    )
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Full detail always lands in the server log, masked or not
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %self,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.client_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Auth("no".to_string()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Ticket(TicketError::SubjectIneligible("u1".to_string())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Internal("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_messages_outside_production() {
        // RUN_MODE is unset in tests, so full detail flows through
        let err = AppError::Internal("pool exhausted".to_string());
        assert!(err.client_message().contains("pool exhausted"));

        let err = AppError::Auth("Missing authorization".to_string());
        assert_eq!(err.client_message(), "Authentication error: Missing authorization");
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AppError::Auth(String::new()).code(), "UNAUTHORIZED");
        assert_eq!(
            AppError::Ticket(TicketError::SubjectIneligible(String::new())).code(),
            "SUBJECT_INELIGIBLE"
        );
        assert_eq!(AppError::Internal(String::new()).code(), "INTERNAL_ERROR");
    }
}

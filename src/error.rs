//! Error handler for the passwordless API.

use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("wait {retry_after} seconds before a new request")]
    RateLimited { retry_after: u64 },

    #[error("new account quota exceeded, retry in {retry_after} seconds")]
    QuotaExceeded { retry_after: u64 },

    #[error("already authenticated, log out first")]
    AlreadyAuthenticated,

    #[error("account was deleted, contact an administrator")]
    AccountDeleted,

    #[error("no free username after {attempts} attempts")]
    ProvisioningExhausted { attempts: u32 },

    #[error("notification could not be delivered")]
    Notification { details: String },

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Wrap a dependency failure into an opaque internal error.
    pub fn internal<E>(details: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.to_owned(),
            source: Some(Box::new(err)),
        }
    }
}

/// Build a validation-shaped error for a single field.
///
/// Also used for "not found" outcomes so the response body does not reveal
/// which identities exist.
pub(crate) fn field_error(
    field: &'static str,
    message: &'static str,
) -> ServerError {
    let mut errors = ValidationErrors::new();
    errors
        .add(field, ValidationError::new(field).with_message(message.into()));
    errors.into()
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let mut retry_after = None;

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::RateLimited { retry_after: wait } => {
                retry_after = Some(*wait);
                response
                    .title("Too many token requests for this address.")
                    .status(StatusCode::TOO_MANY_REQUESTS)
            },

            ServerError::QuotaExceeded { retry_after: wait } => {
                retry_after = Some(*wait);
                response
                    .title("Too many new accounts, try again later.")
                    .status(StatusCode::TOO_MANY_REQUESTS)
            },

            ServerError::AlreadyAuthenticated => response
                .title("Already authenticated.")
                .status(StatusCode::FORBIDDEN),

            ServerError::AccountDeleted => {
                response.title("This account is no longer available.")
            },

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Notification { details } => {
                tracing::error!(%details, "notification delivery failed");

                ResponseError::default()
                    .title("Could not deliver the notification email.")
            },

            ServerError::ProvisioningExhausted { attempts } => {
                tracing::error!(attempts, "username probing exhausted");

                ResponseError::default()
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            ServerError::Axum(_) => response,
        };

        let mut response = response
            .into_response()
            .unwrap_or_else(|_| internal_server_error());

        if let Some(wait) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&wait.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

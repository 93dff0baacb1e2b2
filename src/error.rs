//! Error handler for ldapsense.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("action [ {0} ] is not supported")]
    UnsupportedAction(String),

    #[error("no test user available for testing LDAP attributes")]
    MissingTestUser,

    #[error("ldap configuration property [{0}] is required")]
    MissingProperty(&'static str),

    #[error("{details}")]
    Connection {
        details: String,
        #[source]
        source: Option<ldap3::LdapError>,
    },

    #[error(
        "there are no users found using the filter: [ {filter} ]. Try changing the attribute values"
    )]
    Attributes { filter: String },

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("ldap operation failed: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

impl ServerError {
    /// Wrap a transport or bind failure into a connection error.
    pub fn connection(details: impl Into<String>, source: ldap3::LdapError) -> Self {
        ServerError::Connection {
            details: details.into(),
            source: Some(source),
        }
    }

    /// Whether the error was raised before any directory I/O took place.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            ServerError::Validation(_)
                | ServerError::Axum(_)
                | ServerError::UnsupportedAction(_)
                | ServerError::MissingTestUser
                | ServerError::MissingProperty(_)
        )
    }
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
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
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
        .errors()
        .iter()
        .flat_map(|(field, kind)| {
            let mut out = Vec::new();
            collect_field_errors(field, kind, &mut out);
            out
        })
        .collect()
}

// Flattens nested struct errors into dotted field paths.
fn collect_field_errors(
    field: &str,
    kind: &validator::ValidationErrorsKind,
    out: &mut Vec<FieldError>,
) {
    use validator::ValidationErrorsKind;

    match kind {
        ValidationErrorsKind::Field(issues) => {
            out.extend(issues.iter().map(|issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            }))
        },
        ValidationErrorsKind::Struct(inner) => {
            for (child, kind) in inner.errors() {
                collect_field_errors(&format!("{field}.{child}"), kind, out);
            }
        },
        ValidationErrorsKind::List(items) => {
            for (index, inner) in items {
                for (child, kind) in inner.errors() {
                    collect_field_errors(
                        &format!("{field}[{index}].{child}"),
                        kind,
                        out,
                    );
                }
            }
        },
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Connection { source, .. } => {
                tracing::warn!(error = ?source, details = %self, "ldap connection check failed");
                response.title("Validating LDAP connection configuration failed.")
            },

            ServerError::Attributes { filter } => {
                tracing::warn!(%filter, "ldap attribute check failed");
                response.title("Validating LDAP attributes failed.")
            },

            ServerError::Ldap(err) => {
                response.title("LDAP operation failed.").details(&err.to_string())
            },

            ServerError::IllegalState(_) => {
                tracing::error!(error = %self, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_are_classified() {
        assert!(ServerError::MissingTestUser.is_request_error());
        assert!(ServerError::UnsupportedAction("frobnicate".into()).is_request_error());
        assert!(
            !ServerError::Attributes {
                filter: "(uid=x)".into()
            }
            .is_request_error()
        );
    }

    #[test]
    fn test_attribute_error_names_filter() {
        let err = ServerError::Attributes {
            filter: "(&(objectClass=person)(uid=einstein))".into(),
        };
        assert!(err.to_string().contains("(&(objectClass=person)(uid=einstein))"));
    }

    #[test]
    fn test_status_codes() {
        let response = ServerError::MissingTestUser.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServerError::IllegalState("no candidates").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Error types for the torrent store service

use crate::abuse::AbuseError;
use crate::metainfo::MetainfoError;
use crate::stoplist::StoplistError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;
use torrent_store::{ProviderError, StoreError};

/// Startup errors
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Io(Box<std::io::Error>),
    Provider(ProviderError),
    Stoplist(StoplistError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
            ServerError::Provider(err) => write!(f, "Provider error: {}", err),
            ServerError::Stoplist(err) => write!(f, "Stoplist error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(err) => Some(err.as_ref()),
            ServerError::Provider(err) => Some(err),
            ServerError::Stoplist(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<ProviderError> for ServerError {
    fn from(err: ProviderError) -> Self {
        ServerError::Provider(err)
    }
}

impl From<StoplistError> for ServerError {
    fn from(err: StoplistError) -> Self {
        ServerError::Stoplist(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Request errors, converted to JSON responses
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound("torrent not found".into())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<MetainfoError> for ApiError {
    fn from(err: MetainfoError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<AbuseError> for ApiError {
    fn from(err: AbuseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

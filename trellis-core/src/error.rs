// Error types for the trellis framework

use serde_json::{Value, json};
use thiserror::Error;

/// Result alias used throughout the request pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Structured error raised by API route handlers.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    #[error("Module compilation failed for {path}: {message}")]
    ModuleCompile { path: String, message: String },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Page component missing: {0}")]
    PageComponentMissing(String),

    #[error("Load function failed for {route}: {message}")]
    LoadFunction { route: String, message: String },

    #[error("Render error: {0}")]
    Render(String),

    #[error(
        "Component `{0}` is an async function; page and layout components must build their VNode synchronously (move async work into load())"
    )]
    AsyncComponent(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Create an API error with an explicit status.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Create an API error carrying structured details.
    pub fn api_with_details(status: u16, message: impl Into<String>, details: Value) -> Self {
        Error::Api {
            status,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Create a load function error for a route.
    pub fn load(route: impl Into<String>, message: impl Into<String>) -> Self {
        Error::LoadFunction {
            route: route.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) | Error::NotFound(_) | Error::ModuleNotFound(_) => 404,
            Error::Api { status, .. } => *status,
            Error::BadRequest(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::MethodNotAllowed(_) => 405,
            Error::Conflict(_) => 409,
            Error::ModuleCompile { .. }
            | Error::PageComponentMissing(_)
            | Error::LoadFunction { .. }
            | Error::Render(_)
            | Error::AsyncComponent(_)
            | Error::Io(_)
            | Error::Serialization(_) => 500,
            Error::Internal(message) => infer_status(message),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Message shown to clients, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Api { message, .. } => message.clone(),
            Error::Internal(message)
            | Error::BadRequest(message)
            | Error::Unauthorized(message)
            | Error::Forbidden(message)
            | Error::NotFound(message)
            | Error::Conflict(message)
            | Error::Render(message) => message.clone(),
            Error::LoadFunction { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// JSON body used for every API error response.
    pub fn to_api_body(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.message(),
        });
        if let Error::Api {
            details: Some(details),
            ..
        } = self
        {
            body["details"] = details.clone();
        }
        body
    }
}

/// Infer an HTTP status from a free-form error message.
pub fn infer_status(message: &str) -> u16 {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["not found", "does not exist"]) {
        404
    } else if has(&["unauthorized", "unauthenticated", "not logged in"]) {
        401
    } else if has(&["forbidden", "permission denied", "access denied"]) {
        403
    } else if has(&["conflict", "already exists", "duplicate"]) {
        409
    } else if has(&["invalid", "required", "missing", "malformed"]) {
        400
    } else {
        500
    }
}

//! DynamoDB service error types.
//!
//! DynamoDB errors use JSON format with a `__type` field containing the
//! fully-qualified error type name, e.g.
//! `com.amazonaws.dynamodb.v20111205#ProvisionedThroughputExceededException`.

use std::fmt;

/// Namespace prefix used in `__type` for the 2011-12-05 API.
pub const ERROR_NAMESPACE: &str = "com.amazonaws.dynamodb.v20111205";

/// Well-known DynamoDB error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ServiceErrorCode {
    /// Table already exists or is being modified.
    ResourceInUseException,
    /// Table not found.
    ResourceNotFoundException,
    /// Condition check failed.
    ConditionalCheckFailedException,
    /// Provisioned throughput exceeded.
    ProvisionedThroughputExceededException,
    /// Too many tables or indexes.
    LimitExceededException,
    /// Validation error.
    ValidationException,
    /// Serialization error.
    SerializationException,
    /// Internal server error.
    InternalServerError,
    /// Missing action.
    MissingAction,
    /// Access denied.
    AccessDeniedException,
    /// Unknown operation or bad credentials.
    UnrecognizedClientException,
}

impl ServiceErrorCode {
    const ALL: [Self; 11] = [
        Self::ResourceInUseException,
        Self::ResourceNotFoundException,
        Self::ConditionalCheckFailedException,
        Self::ProvisionedThroughputExceededException,
        Self::LimitExceededException,
        Self::ValidationException,
        Self::SerializationException,
        Self::InternalServerError,
        Self::MissingAction,
        Self::AccessDeniedException,
        Self::UnrecognizedClientException,
    ];

    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::LimitExceededException => "LimitExceededException",
            Self::ValidationException => "ValidationException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::MissingAction => "MissingAction",
            Self::AccessDeniedException => "AccessDeniedException",
            Self::UnrecognizedClientException => "UnrecognizedClientException",
        }
    }

    /// Returns the fully-qualified error type string for the `__type` field.
    #[must_use]
    pub fn error_type(&self) -> String {
        match self {
            Self::ValidationException => "com.amazon.coral.validate#ValidationException".to_owned(),
            other => format!("{ERROR_NAMESPACE}#{}", other.as_str()),
        }
    }

    /// Resolve a `__type` value (qualified or not) to a known code.
    ///
    /// Only the part after the last `#` is compared.
    #[must_use]
    pub fn from_error_type(error_type: &str) -> Option<Self> {
        let short = short_type(error_type);
        Self::ALL.into_iter().find(|code| code.as_str() == short)
    }

    /// Returns the HTTP status the service answers this error with.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::InternalServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn short_type(error_type: &str) -> &str {
    error_type
        .rsplit_once('#')
        .map_or(error_type, |(_, short)| short)
}

/// A DynamoDB error as reported in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// The raw `__type` value, possibly namespace-qualified.
    pub error_type: String,
    /// The resolved code, if the type is one this crate knows.
    pub code: Option<ServiceErrorCode>,
    /// Human-readable message, if the body carried one.
    pub message: Option<String>,
}

impl ServiceError {
    /// Build an error for a known code.
    #[must_use]
    pub fn new(code: ServiceErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_type: code.error_type(),
            code: Some(code),
            message: Some(message.into()),
        }
    }

    /// Parse a JSON error body. Returns `None` when the body has no `__type`.
    ///
    /// The message key is spelled `message` or `Message` depending on the
    /// exception, both are accepted.
    #[must_use]
    pub fn from_json(body: &serde_json::Value) -> Option<Self> {
        let error_type = body.get("__type")?.as_str()?.to_owned();
        let message = body
            .get("message")
            .or_else(|| body.get("Message"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        Some(Self {
            code: ServiceErrorCode::from_error_type(&error_type),
            error_type,
            message,
        })
    }

    /// Returns `true` if this is the throughput-exceeded exception.
    #[must_use]
    pub fn is_throughput_exceeded(&self) -> bool {
        short_type(&self.error_type) == ServiceErrorCode::ProvisionedThroughputExceededException.as_str()
    }

    /// The JSON body the service sends for this error.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({ "__type": self.error_type });
        if let Some(message) = &self.message {
            body["message"] = serde_json::Value::String(message.clone());
        }
        body
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = short_type(&self.error_type);
        match &self.message {
            Some(message) => write!(f, "{short}: {message}"),
            None => f.write_str(short),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Create a `ServiceError` from an error code.
///
/// # Examples
///
/// ```
/// use dynastack_model::service_error;
/// use dynastack_model::error::ServiceErrorCode;
///
/// let err = service_error!(ResourceNotFoundException, "Table not found");
/// assert_eq!(err.code, Some(ServiceErrorCode::ResourceNotFoundException));
/// assert_eq!(err.message.as_deref(), Some("Table not found"));
/// ```
#[macro_export]
macro_rules! service_error {
    ($code:ident, $msg:expr) => {
        $crate::error::ServiceError::new($crate::error::ServiceErrorCode::$code, $msg)
    };
}

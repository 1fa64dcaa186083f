//! Adapter error types and failure classification.
//!
//! # Error Handling Philosophy
//!
//! Errors should be:
//! 1. **Actionable**: Tell the user what to do, not just what went wrong
//! 2. **Specific**: Include relevant context (status codes, adapter types)
//! 3. **Honest**: Nothing is retried or recovered at this layer; every
//!    classified failure surfaces to the chat loop, which owns user-facing
//!    behaviour
//!
//! # Common Errors and Solutions
//!
//! | Error | Cause | Solution |
//! |-------|-------|----------|
//! | `Auth` | Invalid/expired API key | Check the env var the record's `apiKey` points at |
//! | `RateLimited` | Too many requests or quota exhausted | Wait, or switch provider |
//! | `Timeout` | Slow network or oversized request | See the attached remediation text |
//! | `DescriptorNotFound` | No `adapters/<type>/config.json` on any search path | Reinstall or fix the adapter type |
//! | `UnknownAdapterType` | Record names a type with no registered adapter | Fix the provider record |

use thiserror::Error;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Multi-line remediation text attached to timeout errors.
///
/// The same guidance is shown for streaming and non-streaming timeouts;
/// the `context` field on [`AdapterError::Timeout`] distinguishes them.
pub const TIMEOUT_REMEDIATION: &str = "\
The request to the provider did not complete in time. Possible remedies:
  - Reduce the size of the input (fewer messages, shorter context)
  - Raise the provider's `timeout` setting in providerOverrides
  - Check your network connection and any proxy configuration
  - Switch between streaming and non-streaming mode";

/// Message substrings that indicate a timeout when no structured signal
/// is available. Checked case-insensitively.
const TIMEOUT_MARKERS: [&str; 5] = [
    "timeout",
    "timed out",
    "deadline exceeded",
    "etimedout",
    "esockettimedout",
];

/// Errors that can occur while constructing or driving an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No descriptor file exists for the requested adapter type.
    #[error("no adapter descriptor found for type '{adapter_type}'")]
    DescriptorNotFound { adapter_type: String },

    /// A descriptor file exists but fails parsing or the schema check.
    #[error("adapter descriptor for '{adapter_type}' is invalid: {reason}")]
    DescriptorInvalid { adapter_type: String, reason: String },

    /// A provider record references an adapter type with no registered
    /// constructor.
    #[error("unknown adapter type: {0}")]
    UnknownAdapterType(String),

    /// The session selection state is absent or does not resolve to a
    /// usable provider record.
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// Non-2xx response that matched no specialized status class.
    #[error("provider returned HTTP {status} {status_text}{}", fmt_server_message(.message))]
    Http {
        status: u16,
        status_text: String,
        /// Message extracted via the descriptor's `errorMessagePath`,
        /// when the body was parseable.
        message: Option<String>,
    },

    /// HTTP status matched the descriptor's `authErrorStatus` list.
    #[error("authentication rejected by provider (HTTP {status}){}", fmt_server_message(.message))]
    Auth { status: u16, message: Option<String> },

    /// HTTP status matched the descriptor's `rateLimitStatus` or
    /// `quotaErrorStatus` lists.
    #[error("rate limited by provider (HTTP {status}){}", fmt_server_message(.message))]
    RateLimited { status: u16, message: Option<String> },

    /// The transport timed out or was aborted.
    #[error("request timed out during {context}\n{remediation}")]
    Timeout {
        /// What was in flight, e.g. "chat completion" or
        /// "streaming setup".
        context: String,
        remediation: String,
    },

    /// Response body unparseable, or a descriptor-declared path is missing.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// The requested operation is not available for this adapter, e.g.
    /// embedding against a descriptor without an embedding endpoint.
    #[error("operation not supported: {0}")]
    OperationUnsupported(String),

    /// Connection-level failure that is not a timeout.
    #[error("network error: {0}")]
    Network(String),

    /// JSON encode/decode failure on a request or response body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn fmt_server_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl AdapterError {
    /// Build a timeout error with the standard remediation text.
    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
            remediation: TIMEOUT_REMEDIATION.to_string(),
        }
    }

    /// Textual fallback for platforms or wrappers that erase the
    /// structured timeout signal. Prefer structured checks
    /// (`reqwest::Error::is_timeout`) and use this only on opaque
    /// error strings.
    pub fn message_looks_like_timeout(message: &str) -> bool {
        let lowered = message.to_lowercase();
        TIMEOUT_MARKERS.iter().any(|m| lowered.contains(m))
    }

    /// Classify an arbitrary transport error for the given operation
    /// context. Timeouts get remediation text; everything else is a
    /// network error.
    pub fn from_transport(err: reqwest::Error, context: &str) -> Self {
        if err.is_timeout() || Self::message_looks_like_timeout(&err.to_string()) {
            Self::timeout(context)
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }

    /// True for errors whose root cause is the user's provider
    /// configuration rather than the provider itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DescriptorNotFound { .. }
                | Self::DescriptorInvalid { .. }
                | Self::UnknownAdapterType(_)
                | Self::ProviderNotConfigured(_)
        )
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_transport(err, "request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_descriptor_not_found() {
        let err = AdapterError::DescriptorNotFound {
            adapter_type: "grok".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no adapter descriptor found for type 'grok'"
        );
    }

    #[test]
    fn test_display_http_with_message() {
        let err = AdapterError::Http {
            status: 500,
            status_text: "Internal Server Error".to_string(),
            message: Some("model overloaded".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "provider returned HTTP 500 Internal Server Error: model overloaded"
        );
    }

    #[test]
    fn test_display_http_without_message() {
        let err = AdapterError::Http {
            status: 502,
            status_text: "Bad Gateway".to_string(),
            message: None,
        };
        assert_eq!(err.to_string(), "provider returned HTTP 502 Bad Gateway");
    }

    #[test]
    fn test_display_auth() {
        let err = AdapterError::Auth {
            status: 401,
            message: Some("invalid api key".to_string()),
        };
        assert!(err.to_string().contains("HTTP 401"));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[test]
    fn test_timeout_carries_remediation() {
        let err = AdapterError::timeout("chat completion");
        let text = err.to_string();
        assert!(text.contains("chat completion"));
        assert!(text.contains("Reduce the size of the input"));
        assert!(text.contains("streaming"));
    }

    #[test]
    fn test_streaming_setup_timeout_is_distinct() {
        let setup = AdapterError::timeout("streaming setup");
        let plain = AdapterError::timeout("chat completion");
        assert!(setup.to_string().contains("streaming setup"));
        assert_ne!(setup.to_string(), plain.to_string());
    }

    #[test]
    fn test_message_looks_like_timeout() {
        assert!(AdapterError::message_looks_like_timeout(
            "operation timed out after 30s"
        ));
        assert!(AdapterError::message_looks_like_timeout("ETIMEDOUT"));
        assert!(AdapterError::message_looks_like_timeout(
            "context Deadline Exceeded"
        ));
        assert!(AdapterError::message_looks_like_timeout("ESOCKETTIMEDOUT"));
        assert!(!AdapterError::message_looks_like_timeout(
            "connection refused"
        ));
    }

    #[test]
    fn test_is_configuration() {
        assert!(AdapterError::UnknownAdapterType("x".to_string()).is_configuration());
        assert!(
            AdapterError::ProviderNotConfigured("no current provider".to_string())
                .is_configuration()
        );
        assert!(!AdapterError::timeout("chat").is_configuration());
        assert!(!AdapterError::Network("down".to_string()).is_configuration());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: AdapterError = json_err.into();
        assert!(matches!(err, AdapterError::Serialization(_)));
    }

    #[test]
    fn test_operation_unsupported_display() {
        let err = AdapterError::OperationUnsupported(
            "embedding endpoint not declared by adapter".to_string(),
        );
        assert!(err.to_string().contains("embedding endpoint"));
    }
}

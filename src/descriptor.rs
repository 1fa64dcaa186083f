//! Adapter descriptor loading and validation.
//!
//! A descriptor is a static JSON file, one per supported wire format,
//! declaring that format's endpoints, parameter names, response paths,
//! error classification, headers, and default model catalogue. Descriptors
//! ship with the program; user provider records reference them by
//! `adapterType`.
//!
//! # File Location
//!
//! `adapters/<adapterType>/config.json`, probed in order against:
//! 1. the running binary's install directory
//! 2. the crate source directory (development builds)
//! 3. the process's current working directory
//!
//! # Caching
//!
//! Loaded descriptors are cached process-wide by adapter type and treated
//! as immutable for the life of the process. There is no reload path; a
//! restart picks up edited files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::paths;

/// Logical endpoint name for chat completion.
pub const ENDPOINT_CHAT: &str = "chat";
/// Logical endpoint name for embeddings.
pub const ENDPOINT_EMBEDDING: &str = "embedding";

// ============================================================================
// Descriptor Schema
// ============================================================================

/// How the adapter obtains token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCountingMethod {
    /// Issue the chat request and read the backend's usage block.
    ResponseUsage,
    /// Estimate offline; never contact the backend.
    Estimation,
}

/// Reserved weights for richer offline estimation heuristics.
///
/// Only `base_ratio` participates today (and is fixed at four characters
/// per token by [`crate::canonical::estimate_tokens`]); the rest are
/// carried so descriptors can declare them ahead of the heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EstimationWeights {
    pub base_ratio: f64,
    pub chinese_weight: f64,
    pub code_weight: f64,
    pub special_char_weight: f64,
}

impl Default for EstimationWeights {
    fn default() -> Self {
        Self {
            base_ratio: 4.0,
            chinese_weight: 1.0,
            code_weight: 1.0,
            special_char_weight: 1.0,
        }
    }
}

/// Token counting declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounting {
    pub method: TokenCountingMethod,
    #[serde(default)]
    pub fallback_estimation: EstimationWeights,
}

/// Paths into the usage block of a response. Each may be a `+` expression
/// across multiple paths (see [`crate::paths::eval_sum`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMapping {
    pub prompt_tokens: String,
    pub completion_tokens: String,
    pub total_tokens: String,
}

/// Where response fields live, as dotted/bracketed JSON paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMapping {
    pub content: String,
    pub finish_reason: String,
    pub usage: UsageMapping,
    /// Streaming equivalent of `content`; defaults to the delta form of
    /// the non-streaming path on OpenAI-family wires.
    #[serde(default)]
    pub stream_content: Option<String>,
    /// Streaming equivalent of `finish_reason`.
    #[serde(default)]
    pub stream_finish_reason: Option<String>,
}

/// HTTP status classification plus the path to the server's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorHandling {
    pub rate_limit_status: Vec<u16>,
    pub auth_error_status: Vec<u16>,
    pub quota_error_status: Vec<u16>,
    pub error_message_path: Option<String>,
}

impl ErrorHandling {
    /// Classify a non-2xx response into the adapter error taxonomy,
    /// extracting the server's message when the body parses.
    pub fn classify(&self, status: u16, status_text: &str, body: &str) -> AdapterError {
        let message = self
            .error_message_path
            .as_deref()
            .and_then(|path| {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                paths::extract_str(&value, path).map(str::to_string)
            })
            .filter(|m| !m.is_empty());

        if self.auth_error_status.contains(&status) {
            AdapterError::Auth { status, message }
        } else if self.rate_limit_status.contains(&status)
            || self.quota_error_status.contains(&status)
        {
            AdapterError::RateLimited { status, message }
        } else {
            AdapterError::Http {
                status,
                status_text: status_text.to_string(),
                message,
            }
        }
    }
}

/// Header maps shipped by the descriptor. Values may contain the
/// `{apiKey}` placeholder, substituted when headers are built for a
/// request (never at load time, so rotated env vars are honoured).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RequestHeaders {
    pub required: HashMap<String, String>,
    pub optional: HashMap<String, String>,
}

/// JSON response-mode behaviour.
///
/// Some backends only produce reliable JSON when the final user message
/// demands it in prose; wire formats with native structured output can
/// turn the rewrite off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsonModeConfig {
    pub prompt_rewrite: bool,
}

impl Default for JsonModeConfig {
    fn default() -> Self {
        Self {
            prompt_rewrite: true,
        }
    }
}

/// Per-model feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelFeatures {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
}

/// Catalogue entry for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCard {
    pub display_name: String,
    #[serde(default)]
    pub context_window: u64,
    #[serde(default)]
    pub max_output_tokens: u64,
    #[serde(default)]
    pub supported_modalities: Vec<String>,
    #[serde(default)]
    pub features: ModelFeatures,
}

impl ModelCard {
    /// Whether the card declares the given input modality (e.g. `image`).
    pub fn supports_modality(&self, modality: &str) -> bool {
        self.supported_modalities.iter().any(|m| m == modality)
    }
}

/// One wire format's complete static declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDescriptor {
    pub adapter_type: String,
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub parameter_mapping: HashMap<String, String>,
    pub response_mapping: ResponseMapping,
    pub token_counting: TokenCounting,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub request_headers: RequestHeaders,
    #[serde(default)]
    pub json_mode: JsonModeConfig,
    pub default_models: HashMap<String, ModelCard>,
}

impl AdapterDescriptor {
    /// Parse and validate a descriptor from JSON text.
    pub fn from_json(adapter_type: &str, json: &str) -> Result<Self> {
        let descriptor: Self =
            serde_json::from_str(json).map_err(|e| AdapterError::DescriptorInvalid {
                adapter_type: adapter_type.to_string(),
                reason: e.to_string(),
            })?;
        descriptor.validate()?;
        if descriptor.adapter_type != adapter_type {
            return Err(AdapterError::DescriptorInvalid {
                adapter_type: adapter_type.to_string(),
                reason: format!(
                    "descriptor declares adapterType '{}' but was loaded for '{}'",
                    descriptor.adapter_type, adapter_type
                ),
            });
        }
        Ok(descriptor)
    }

    /// Semantic checks beyond what deserialization enforces.
    fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(AdapterError::DescriptorInvalid {
                adapter_type: self.adapter_type.clone(),
                reason: reason.to_string(),
            })
        };
        if self.adapter_type.is_empty() {
            return fail("adapterType must not be empty");
        }
        if !self.endpoints.contains_key(ENDPOINT_CHAT) {
            return fail("endpoints.chat is required");
        }
        if self.response_mapping.content.is_empty() {
            return fail("responseMapping.content must not be empty");
        }
        if self.response_mapping.finish_reason.is_empty() {
            return fail("responseMapping.finishReason must not be empty");
        }
        if self.default_models.is_empty() {
            return fail("defaultModels must declare at least one model");
        }
        Ok(())
    }

    /// URL path suffix for a logical endpoint.
    pub fn endpoint(&self, logical: &str) -> Option<&str> {
        self.endpoints.get(logical).map(String::as_str)
    }

    /// Wire name for a canonical generation parameter, if mapped.
    pub fn wire_parameter(&self, canonical: &str) -> Option<&str> {
        self.parameter_mapping.get(canonical).map(String::as_str)
    }
}

// ============================================================================
// Loader
// ============================================================================

fn cache() -> &'static RwLock<HashMap<String, Arc<AdapterDescriptor>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<AdapterDescriptor>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Directories probed for `adapters/<type>/config.json`, in order.
fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::with_capacity(3);
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            roots.push(dir.to_path_buf());
        }
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    roots
}

fn is_safe_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Load (or fetch from cache) the descriptor for an adapter type.
///
/// # Errors
///
/// [`AdapterError::DescriptorNotFound`] when no search root yields a file,
/// [`AdapterError::DescriptorInvalid`] when a file exists but fails
/// parsing or validation.
pub fn load_descriptor(adapter_type: &str) -> Result<Arc<AdapterDescriptor>> {
    if let Some(found) = cache().read().expect("descriptor cache poisoned").get(adapter_type) {
        return Ok(Arc::clone(found));
    }

    if !is_safe_type_name(adapter_type) {
        return Err(AdapterError::DescriptorInvalid {
            adapter_type: adapter_type.to_string(),
            reason: "adapter type may only contain alphanumerics, '-' and '_'".to_string(),
        });
    }

    let relative: PathBuf = ["adapters", adapter_type, "config.json"].iter().collect();
    for root in search_roots() {
        let candidate = root.join(&relative);
        let Ok(text) = std::fs::read_to_string(&candidate) else {
            continue;
        };
        debug!(
            adapter_type,
            path = %candidate.display(),
            "loading adapter descriptor"
        );
        let descriptor = Arc::new(AdapterDescriptor::from_json(adapter_type, &text)?);
        cache()
            .write()
            .expect("descriptor cache poisoned")
            .insert(adapter_type.to_string(), Arc::clone(&descriptor));
        return Ok(descriptor);
    }

    Err(AdapterError::DescriptorNotFound {
        adapter_type: adapter_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json(adapter_type: &str) -> String {
        format!(
            r#"{{
                "adapterType": "{adapter_type}",
                "endpoints": {{"chat": "/chat/completions"}},
                "responseMapping": {{
                    "content": "choices[0].message.content",
                    "finishReason": "choices[0].finish_reason",
                    "usage": {{
                        "promptTokens": "usage.prompt_tokens",
                        "completionTokens": "usage.completion_tokens",
                        "totalTokens": "usage.total_tokens"
                    }}
                }},
                "tokenCounting": {{"method": "response_usage"}},
                "defaultModels": {{
                    "m1": {{"displayName": "Model One", "contextWindow": 4096}}
                }}
            }}"#
        )
    }

    #[test]
    fn test_minimal_descriptor_parses() {
        let d = AdapterDescriptor::from_json("openai", &minimal_json("openai")).unwrap();
        assert_eq!(d.adapter_type, "openai");
        assert_eq!(d.endpoint(ENDPOINT_CHAT), Some("/chat/completions"));
        assert_eq!(d.endpoint(ENDPOINT_EMBEDDING), None);
        assert_eq!(d.token_counting.method, TokenCountingMethod::ResponseUsage);
        // Defaults fill in the optional sections.
        assert!(d.json_mode.prompt_rewrite);
        assert_eq!(d.token_counting.fallback_estimation.base_ratio, 4.0);
        assert!(d.error_handling.auth_error_status.is_empty());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = AdapterDescriptor::from_json("anthropic", &minimal_json("openai")).unwrap_err();
        match err {
            AdapterError::DescriptorInvalid { reason, .. } => {
                assert!(reason.contains("openai"));
                assert!(reason.contains("anthropic"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_chat_endpoint_rejected() {
        let json = minimal_json("openai").replace("\"chat\"", "\"completion\"");
        let err = AdapterDescriptor::from_json("openai", &json).unwrap_err();
        assert!(err.to_string().contains("endpoints.chat"));
    }

    #[test]
    fn test_empty_model_catalogue_rejected() {
        let json = minimal_json("openai").replace(
            r#""m1": {"displayName": "Model One", "contextWindow": 4096}"#,
            "",
        );
        let err = AdapterDescriptor::from_json("openai", &json).unwrap_err();
        assert!(err.to_string().contains("defaultModels"));
    }

    #[test]
    fn test_garbage_json_is_invalid() {
        let err = AdapterDescriptor::from_json("openai", "{not json").unwrap_err();
        assert!(matches!(err, AdapterError::DescriptorInvalid { .. }));
    }

    #[test]
    fn test_classify_http_statuses() {
        let handling = ErrorHandling {
            rate_limit_status: vec![429],
            auth_error_status: vec![401, 403],
            quota_error_status: vec![402],
            error_message_path: Some("error.message".to_string()),
        };
        let body = r#"{"error": {"message": "key expired"}}"#;

        match handling.classify(401, "Unauthorized", body) {
            AdapterError::Auth { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message.as_deref(), Some("key expired"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(matches!(
            handling.classify(429, "Too Many Requests", "{}"),
            AdapterError::RateLimited { status: 429, .. }
        ));
        assert!(matches!(
            handling.classify(402, "Payment Required", "{}"),
            AdapterError::RateLimited { status: 402, .. }
        ));
        match handling.classify(500, "Internal Server Error", "not json") {
            AdapterError::Http {
                status, message, ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, None);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_model_card_modalities() {
        let card = ModelCard {
            display_name: "m".to_string(),
            context_window: 0,
            max_output_tokens: 0,
            supported_modalities: vec!["text".to_string(), "image".to_string()],
            features: ModelFeatures::default(),
        };
        assert!(card.supports_modality("image"));
        assert!(!card.supports_modality("audio"));
    }

    #[test]
    fn test_unsafe_type_names_rejected() {
        assert!(matches!(
            load_descriptor("../escape"),
            Err(AdapterError::DescriptorInvalid { .. })
        ));
        assert!(matches!(
            load_descriptor(""),
            Err(AdapterError::DescriptorInvalid { .. })
        ));
    }

    #[test]
    fn test_unknown_type_not_found() {
        assert!(matches!(
            load_descriptor("no-such-adapter"),
            Err(AdapterError::DescriptorNotFound { .. })
        ));
    }

    #[test]
    fn test_shipped_openai_descriptor_loads_and_caches() {
        // Resolved via the source-relative search root.
        let first = load_descriptor("openai").unwrap();
        assert_eq!(first.adapter_type, "openai");
        assert!(first.endpoint(ENDPOINT_CHAT).is_some());
        assert!(!first.default_models.is_empty());

        let second = load_descriptor("openai").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_shipped_anthropic_descriptor_loads() {
        let d = load_descriptor("anthropic").unwrap();
        assert_eq!(d.adapter_type, "anthropic");
        assert!(!d.json_mode.prompt_rewrite);
    }
}

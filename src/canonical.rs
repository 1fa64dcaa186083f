//! Canonical request/response vocabulary and the generator contract.
//!
//! This is the lingua franca the chat loop speaks. Nothing in this module
//! knows about any particular wire protocol; adapters translate between
//! these types and their backend's format.
//!
//! # Key Types
//!
//! - [`Content`]: one conversation turn, a role plus ordered [`Part`]s
//! - [`Part`]: text, inline binary, a tool call, or a tool response
//! - [`Tool`]: a function declaration, either direct or produced lazily
//!   by a callable wrapper
//! - [`ContentGenerator`]: the polymorphism point the chat loop consumes;
//!   every adapter fulfils it

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

// ============================================================================
// Messages
// ============================================================================

/// Who produced a canonical content entry.
///
/// System text is not a role here: it travels separately as
/// [`GenerateRequest::system_instruction`] and each adapter decides how its
/// wire format carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human (or from tool results fed back).
    User,
    /// Output from the model.
    Model,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Wire-assigned call id. Adapters synthesize `call_<index>` when a
    /// backend omits it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Parsed arguments. Empty when the backend sent none or sent
    /// unparseable JSON (the latter is logged).
    #[serde(default)]
    pub args: serde_json::Map<String, JsonValue>,
}

/// The host's answer to an earlier [`FunctionCall`], keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub response: JsonValue,
}

/// One element of a content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    /// Plain text.
    Text(String),
    /// Inline binary payload, e.g. an image attached to a user turn.
    InlineData { mime_type: String, data: String },
    /// Tool invocation emitted by the model.
    FunctionCall(FunctionCall),
    /// Tool result supplied by the host.
    FunctionResponse(FunctionResponse),
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Part::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    /// A model turn with a single text part.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// A user turn carrying one tool response.
    pub fn function_response(id: impl Into<String>, response: JsonValue) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::FunctionResponse(FunctionResponse {
                id: id.into(),
                response,
            })],
        }
    }

    /// Concatenated text of all text parts.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls carried by this turn, in order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall(fc) => Some(fc),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall(_)))
    }
}

// ============================================================================
// Tools
// ============================================================================

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like parameter description. Kept as a raw value:
    /// adapters normalize it per wire format (see `schema`).
    pub parameters: JsonValue,
}

/// Thunk that yields a declaration on demand.
pub type DeclarationThunk = Arc<dyn Fn() -> FunctionDeclaration + Send + Sync>;

/// A tool declaration in either of its two source shapes.
///
/// The callable form wraps a thunk that produces the declaration; it is
/// evaluated once per request construction, never cached across requests.
#[derive(Clone)]
pub enum Tool {
    Declaration(FunctionDeclaration),
    Callable(DeclarationThunk),
}

impl Tool {
    /// Normalize to a plain declaration, invoking the thunk if needed.
    pub fn declaration(&self) -> FunctionDeclaration {
        match self {
            Tool::Declaration(d) => d.clone(),
            Tool::Callable(thunk) => thunk(),
        }
    }

    /// Wrap a closure as a callable tool.
    pub fn callable<F>(thunk: F) -> Self
    where
        F: Fn() -> FunctionDeclaration + Send + Sync + 'static,
    {
        Tool::Callable(Arc::new(thunk))
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Declaration(d) => f.debug_tuple("Declaration").field(d).finish(),
            Tool::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Generation parameters, plus optional tool declarations.
///
/// Parameter names here are canonical; adapters rename them per their
/// descriptor's `parameterMapping` when building the wire body.
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    /// `"application/json"` requests strict-JSON output; adapters whose
    /// descriptor enables prompt rewriting also amend the final user
    /// message.
    pub response_mime_type: Option<String>,
    pub tools: Vec<Tool>,
}

/// A full content-generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub system_instruction: Option<String>,
    pub config: Option<GenerationConfig>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, contents: Vec<Content>) -> Self {
        Self {
            model: model.into(),
            contents,
            system_instruction: None,
            config: None,
        }
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

impl FinishReason {
    /// Map an OpenAI-family `finish_reason` string.
    ///
    /// `tool_calls` maps to `Stop`: from the chat loop's perspective the
    /// turn completed normally and the calls are in the parts.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "tool_calls" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            "content_filter" => FinishReason::Safety,
            _ => FinishReason::Other,
        }
    }
}

/// Token accounting for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One generated alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Content,
    pub finish_reason: Option<FinishReason>,
}

/// A full or partial (streaming chunk) generation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub candidates: Vec<Candidate>,
    pub usage: Option<UsageMetadata>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate, if any.
    pub fn text(&self) -> Option<String> {
        self.candidates.first().map(|c| c.content.joined_text())
    }

    /// Tool calls of the first candidate.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.candidates
            .first()
            .map(|c| c.content.function_calls())
            .unwrap_or_default()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }
}

/// Result of [`ContentGenerator::count_tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub total_tokens: u64,
}

/// One embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEmbedding {
    pub values: Vec<f32>,
}

/// Result of [`ContentGenerator::embed_content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<ContentEmbedding>,
}

/// Offline token estimate: four characters per token over the serialized
/// contents, rounded up. Deliberately crude; backends that report usage
/// are preferred (`tokenCounting.method = "response_usage"`).
pub fn estimate_tokens(contents: &[Content]) -> u64 {
    let serialized = serde_json::to_string(contents).unwrap_or_default();
    (serialized.len() as u64).div_ceil(4)
}

// ============================================================================
// Generator contract
// ============================================================================

/// The interface the chat loop consumes. Each adapter fulfils it for one
/// wire protocol.
///
/// Instances hold no long-lived mutable state; streaming accumulation
/// state is owned by the stream returned from
/// [`generate_content_stream`](Self::generate_content_stream), so two
/// concurrent streams from one adapter are independent.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate a complete response.
    async fn generate_content(
        &self,
        request: GenerateRequest,
        prompt_id: Option<&str>,
    ) -> Result<GenerateResponse>;

    /// Generate a streaming response. Chunks arrive in wire order; tool
    /// calls are consolidated into the terminal chunk.
    async fn generate_content_stream(
        &self,
        request: GenerateRequest,
        prompt_id: Option<&str>,
    ) -> Result<BoxStream<'static, Result<GenerateResponse>>>;

    /// Count the tokens the request would consume.
    async fn count_tokens(&self, request: &GenerateRequest) -> Result<TokenCount>;

    /// Embed the request's flattened text.
    async fn embed_content(&self, request: &GenerateRequest) -> Result<EmbedResponse>;
}

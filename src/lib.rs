//! Multi-provider LLM adapter core.
//!
//! The provider abstraction layer of a command-line AI assistant. The
//! assistant's chat loop speaks one canonical request/response vocabulary;
//! this crate plugs any user-defined backend that talks an OpenAI- or
//! Anthropic-compatible protocol into that vocabulary, without
//! recompilation and with tool calling preserved end-to-end, including
//! tool calls fragmented across streaming chunks.
//!
//! # Architecture
//!
//! ```text
//! chat loop
//!    │  selectedAuthType == "custom-provider"
//!    ▼
//! AdapterRegistry::generator_from_settings        (factory)
//!    │  adapterType ──▶ adapters/<type>/config.json   (descriptor)
//!    │  record + descriptor ──▶ resolved config       (resolver)
//!    ▼
//! adapter: Box<dyn ContentGenerator>
//!    │  canonical ──▶ wire body                       (translator)
//!    │  HTTP / SSE                                    (transport)
//!    │  wire ──▶ canonical, tool calls reassembled    (translator + accumulator)
//!    ▼
//! canonical GenerateResponse
//! ```
//!
//! A backend is described, not coded: the descriptor declares endpoints,
//! parameter names, response-field paths, error statuses, headers, and a
//! model catalogue. One adapter implementation therefore covers OpenAI,
//! DeepSeek, Qwen, and any compatible gateway; the user's provider record
//! supplies the base URL, key (literal or `$ENV_VAR`), enabled models,
//! and overrides.
//!
//! # Example
//!
//! ```ignore
//! use conduit_llm::{AdapterRegistry, Content, GenerateRequest, Settings};
//!
//! let settings = Settings::load("~/.assistant/settings.json")?;
//! let generator = AdapterRegistry::with_builtins().generator_from_settings(&settings)?;
//!
//! let request = GenerateRequest::new("deepseek-chat", vec![Content::user_text("hi")]);
//! let response = generator.generate_content(request, None).await?;
//! println!("{}", response.text().unwrap_or_default());
//! ```

pub mod canonical;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod paths;
pub mod providers;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod streaming;

pub use canonical::{
    estimate_tokens, Candidate, Content, ContentEmbedding, ContentGenerator, EmbedResponse,
    FinishReason, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateRequest,
    GenerateResponse, GenerationConfig, Part, Role, TokenCount, Tool, UsageMetadata,
};
pub use descriptor::{
    load_descriptor, AdapterDescriptor, ModelCard, ModelFeatures, TokenCountingMethod,
};
pub use error::{AdapterError, Result};
pub use factory::{AdapterConstructor, AdapterRegistry};
pub use providers::{AnthropicAdapter, MockAdapter, MockTurn, OpenAiAdapter};
pub use settings::{ProviderRecord, Settings, AUTH_TYPE_CUSTOM_PROVIDER};
pub use streaming::ToolCallAccumulator;

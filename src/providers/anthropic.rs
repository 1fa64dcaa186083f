//! Anthropic Messages adapter.
//!
//! Structural counterpart of the OpenAI-family adapter for backends that
//! speak the Anthropic Messages protocol. Non-streaming generation and
//! tool calling are translated in full; streaming and embedding are not
//! offered by this adapter and report [`AdapterError::OperationUnsupported`].
//!
//! Wire differences from the OpenAI family that shape this module:
//! - the system prompt is a separate `system` field, not a message
//! - tool traffic travels as `tool_use` / `tool_result` content blocks
//!   inside ordinary messages instead of dedicated roles
//! - `max_tokens` is mandatory on every request

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::canonical::{
    estimate_tokens, Candidate, Content, ContentGenerator, EmbedResponse, FinishReason,
    FunctionCall, GenerateRequest, GenerateResponse, Part, Role, TokenCount, UsageMetadata,
};
use crate::descriptor::{AdapterDescriptor, ENDPOINT_CHAT};
use crate::error::{AdapterError, Result};
use crate::paths;
use crate::resolver;
use crate::schema::convert_schema;
use crate::settings::ProviderRecord;

/// `max_tokens` sent when neither the model card nor the request sets one.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Adapter for one configured Anthropic-protocol provider.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    descriptor: Arc<AdapterDescriptor>,
    record: ProviderRecord,
    model: String,
    timeout: Duration,
}

impl AnthropicAdapter {
    pub fn new(
        descriptor: Arc<AdapterDescriptor>,
        record: ProviderRecord,
        model: String,
    ) -> Result<Self> {
        let timeout = resolver::resolve_timeout(&record, resolver::DEFAULT_TIMEOUT);
        debug!(
            provider = %record.id,
            model = %model,
            timeout_ms = timeout.as_millis() as u64,
            "creating Anthropic adapter"
        );
        Ok(Self {
            client: reqwest::Client::new(),
            descriptor,
            record,
            model,
            timeout,
        })
    }

    /// Build the Messages-API request body.
    fn build_wire_request(&self, request: &GenerateRequest) -> Map<String, JsonValue> {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model));

        let max_tokens = request
            .config
            .as_ref()
            .and_then(|c| c.max_output_tokens)
            .map(u64::from)
            .or_else(|| {
                resolver::resolve_model_config(&self.descriptor, &self.record, &self.model)
                    .map(|card| card.max_output_tokens)
                    .filter(|n| *n > 0)
            })
            .unwrap_or(DEFAULT_MAX_TOKENS);
        body.insert("max_tokens".to_string(), json!(max_tokens));

        if let Some(system) = &request.system_instruction {
            body.insert("system".to_string(), json!(system));
        }

        body.insert(
            "messages".to_string(),
            JsonValue::Array(request.contents.iter().map(convert_content).collect()),
        );

        if let Some(config) = &request.config {
            for (canonical, value) in [
                ("temperature", config.temperature.map(JsonValue::from)),
                ("topP", config.top_p.map(JsonValue::from)),
                (
                    "stopSequences",
                    config.stop_sequences.as_ref().map(|s| json!(s)),
                ),
            ] {
                let (Some(wire_name), Some(value)) =
                    (self.descriptor.wire_parameter(canonical), value)
                else {
                    continue;
                };
                body.insert(wire_name.to_string(), value);
            }

            let tools: Vec<JsonValue> = config
                .tools
                .iter()
                .map(|tool| {
                    let decl = tool.declaration();
                    json!({
                        "name": decl.name,
                        "description": decl.description,
                        "input_schema": convert_schema(&decl.parameters),
                    })
                })
                .collect();
            if !tools.is_empty() {
                body.insert("tools".to_string(), JsonValue::Array(tools));
            }
        }

        body
    }

    /// Translate a Messages-API response.
    fn parse_response(&self, body: &JsonValue) -> Result<GenerateResponse> {
        let blocks = body
            .get("content")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                AdapterError::MalformedResponse("response carries no content blocks".to_string())
            })?;

        let mut parts = Vec::new();
        for block in blocks {
            match block.get("type").and_then(JsonValue::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(JsonValue::as_str) {
                        parts.push(Part::text(text));
                    }
                }
                Some("tool_use") => {
                    let args = match block.get("input") {
                        Some(JsonValue::Object(map)) => map.clone(),
                        _ => Map::new(),
                    };
                    parts.push(Part::FunctionCall(FunctionCall {
                        id: block
                            .get("id")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string),
                        name: block
                            .get("name")
                            .and_then(JsonValue::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        args,
                    }));
                }
                _ => {}
            }
        }

        let finish = paths::extract_str(body, &self.descriptor.response_mapping.finish_reason)
            .map(map_stop_reason);
        let usage_mapping = &self.descriptor.response_mapping.usage;

        Ok(GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Role::Model,
                    parts,
                },
                finish_reason: finish,
            }],
            usage: Some(UsageMetadata {
                prompt_tokens: paths::eval_sum(body, &usage_mapping.prompt_tokens),
                completion_tokens: paths::eval_sum(body, &usage_mapping.completion_tokens),
                total_tokens: paths::eval_sum(body, &usage_mapping.total_tokens),
            }),
        })
    }
}

#[async_trait]
impl ContentGenerator for AnthropicAdapter {
    async fn generate_content(
        &self,
        request: GenerateRequest,
        prompt_id: Option<&str>,
    ) -> Result<GenerateResponse> {
        debug!(
            provider = %self.record.id,
            model = %self.model,
            prompt_id = prompt_id.unwrap_or(""),
            "generate_content"
        );

        let path = self
            .descriptor
            .endpoint(ENDPOINT_CHAT)
            .ok_or_else(|| AdapterError::OperationUnsupported("no chat endpoint".to_string()))?;
        let url = format!("{}{path}", self.record.base_url.trim_end_matches('/'));
        let headers = resolver::resolve_headers(&self.descriptor, &self.record);
        let body = self.build_wire_request(&request);

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(e, "chat completion"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::from_transport(e, "chat completion"))?;
        if !status.is_success() {
            return Err(self.descriptor.error_handling.classify(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                &text,
            ));
        }

        let wire: JsonValue = serde_json::from_str(&text).map_err(|e| {
            AdapterError::MalformedResponse(format!("response body is not JSON: {e}"))
        })?;
        self.parse_response(&wire)
    }

    async fn generate_content_stream(
        &self,
        _request: GenerateRequest,
        _prompt_id: Option<&str>,
    ) -> Result<BoxStream<'static, Result<GenerateResponse>>> {
        Err(AdapterError::OperationUnsupported(
            "streaming is not implemented for the anthropic adapter".to_string(),
        ))
    }

    async fn count_tokens(&self, request: &GenerateRequest) -> Result<TokenCount> {
        // This adapter estimates regardless of the declared method; the
        // shipped anthropic descriptor says `estimation` anyway.
        Ok(TokenCount {
            total_tokens: estimate_tokens(&request.contents),
        })
    }

    async fn embed_content(&self, _request: &GenerateRequest) -> Result<EmbedResponse> {
        Err(AdapterError::OperationUnsupported(
            "the anthropic adapter offers no embedding endpoint".to_string(),
        ))
    }
}

/// Translate one canonical content entry into a Messages-API message.
fn convert_content(content: &Content) -> JsonValue {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "assistant",
    };

    let blocks: Vec<JsonValue> = content
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text(text) => Some(json!({"type": "text", "text": text})),
            Part::FunctionCall(fc) => Some(json!({
                "type": "tool_use",
                "id": fc.id.clone().unwrap_or_default(),
                "name": fc.name,
                "input": JsonValue::Object(fc.args.clone()),
            })),
            Part::FunctionResponse(fr) => Some(json!({
                "type": "tool_result",
                "tool_use_id": fr.id,
                "content": match &fr.response {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })),
            Part::InlineData { mime_type, data } if mime_type.starts_with("image/") => {
                Some(json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": mime_type, "data": data},
                }))
            }
            Part::InlineData { .. } => None,
        })
        .collect();

    json!({"role": role, "content": blocks})
}

/// Map an Anthropic `stop_reason` onto the canonical finish reasons.
fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "tool_use" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::MaxTokens,
        "refusal" => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

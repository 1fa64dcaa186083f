//! OpenAI-family adapter: canonical ↔ wire translation and transport.
//!
//! Speaks the chat-completions protocol used by OpenAI and its
//! compatibles (DeepSeek, Qwen, and most gateways). The request body
//! shape is fixed by the protocol; everything a backend is allowed to
//! vary (parameter names, response field locations, error statuses,
//! headers, the model catalogue) comes from the adapter descriptor, so
//! one implementation covers every compatible endpoint.
//!
//! Responses are walked as untyped JSON along the descriptor's declared
//! paths. Tool calls survive the round trip in both directions; in
//! streaming mode their fragments are reassembled by a per-stream
//! [`ToolCallAccumulator`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::canonical::{
    estimate_tokens, Candidate, Content, ContentEmbedding, ContentGenerator, EmbedResponse,
    FinishReason, FunctionCall, GenerateRequest, GenerateResponse, GenerationConfig, Part, Role,
    TokenCount, UsageMetadata,
};
use crate::descriptor::{
    AdapterDescriptor, TokenCountingMethod, ENDPOINT_CHAT, ENDPOINT_EMBEDDING,
};
use crate::error::{AdapterError, Result};
use crate::paths;
use crate::resolver;
use crate::schema::convert_schema;
use crate::settings::ProviderRecord;
use crate::streaming::{parse_tool_arguments, ToolCallAccumulator};

/// Instruction appended to the final user message in JSON response mode.
/// Some backends only produce clean JSON when asked in prose; descriptors
/// for wire formats with native structured output disable the rewrite.
const JSON_MODE_INSTRUCTION: &str =
    "\n\nRespond with a single valid JSON object and nothing else: no prose, \
     no markdown fences, no text before or after the JSON.";

/// Embedding model sent to `endpoints.embedding`.
const EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Canonical generation parameters, paired with an extractor over
/// [`GenerationConfig`]. The wire name for each comes from the
/// descriptor's `parameterMapping`.
const CANONICAL_PARAMETERS: [(&str, fn(&GenerationConfig) -> Option<JsonValue>); 6] = [
    ("temperature", |c| c.temperature.map(JsonValue::from)),
    ("topP", |c| c.top_p.map(JsonValue::from)),
    ("maxOutputTokens", |c| {
        c.max_output_tokens.map(JsonValue::from)
    }),
    ("stopSequences", |c| {
        c.stop_sequences.as_ref().map(|s| json!(s))
    }),
    ("presencePenalty", |c| {
        c.presence_penalty.map(JsonValue::from)
    }),
    ("frequencyPenalty", |c| {
        c.frequency_penalty.map(JsonValue::from)
    }),
];

/// Adapter for one configured OpenAI-compatible provider.
///
/// Holds no per-request mutable state; a fresh accumulator is created
/// inside every stream, so concurrent streams are independent.
pub struct OpenAiAdapter {
    client: Client,
    descriptor: Arc<AdapterDescriptor>,
    record: ProviderRecord,
    model: String,
    timeout: Duration,
}

impl OpenAiAdapter {
    /// Construct the adapter for a resolved provider record and model.
    pub fn new(
        descriptor: Arc<AdapterDescriptor>,
        record: ProviderRecord,
        model: String,
    ) -> Result<Self> {
        let timeout = resolver::resolve_timeout(&record, resolver::DEFAULT_TIMEOUT);
        debug!(
            provider = %record.id,
            model = %model,
            base_url = %record.base_url,
            timeout_ms = timeout.as_millis() as u64,
            max_retries = resolver::resolve_max_retries(&record, resolver::DEFAULT_MAX_RETRIES),
            "creating OpenAI-family adapter"
        );
        Ok(Self {
            client: Client::new(),
            descriptor,
            record,
            model,
            timeout,
        })
    }

    fn url(&self, logical: &str) -> Result<String> {
        let path = self.descriptor.endpoint(logical).ok_or_else(|| {
            AdapterError::OperationUnsupported(format!(
                "adapter '{}' declares no '{logical}' endpoint",
                self.descriptor.adapter_type
            ))
        })?;
        Ok(format!(
            "{}{}",
            self.record.base_url.trim_end_matches('/'),
            path
        ))
    }

    // ========================================================================
    // Outbound translation
    // ========================================================================

    /// Build the wire request body.
    fn build_wire_request(&self, request: &GenerateRequest, stream: bool) -> Map<String, JsonValue> {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model));

        let mut messages = self.convert_contents(request);

        if let Some(config) = &request.config {
            for (canonical, extract) in CANONICAL_PARAMETERS {
                let (Some(wire_name), Some(value)) =
                    (self.descriptor.wire_parameter(canonical), extract(config))
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
                        "type": "function",
                        "function": {
                            "name": decl.name,
                            "description": decl.description,
                            "parameters": convert_schema(&decl.parameters),
                        }
                    })
                })
                .collect();
            if !tools.is_empty() {
                body.insert("tools".to_string(), JsonValue::Array(tools));
            }

            if config.response_mime_type.as_deref() == Some("application/json") {
                if self.descriptor.json_mode.prompt_rewrite {
                    append_to_last_user_message(&mut messages, JSON_MODE_INSTRUCTION);
                }
                body.insert(
                    "response_format".to_string(),
                    json!({"type": "json_object"}),
                );
            }
        }

        body.insert("messages".to_string(), JsonValue::Array(messages));
        if stream {
            body.insert("stream".to_string(), json!(true));
        }
        body
    }

    /// Translate canonical contents into wire messages.
    fn convert_contents(&self, request: &GenerateRequest) -> Vec<JsonValue> {
        let mut messages = Vec::with_capacity(request.contents.len() + 1);

        if let Some(system) = &request.system_instruction {
            messages.push(json!({"role": "system", "content": system}));
        }

        let image_capable = resolver::resolve_model_config(
            &self.descriptor,
            &self.record,
            &self.model,
        )
        .map(|card| card.supports_modality("image"))
        .unwrap_or(false);

        for content in &request.contents {
            // Tool responses always become their own `tool` messages,
            // keyed by the call id they answer.
            let mut remaining: Vec<&Part> = Vec::new();
            for part in &content.parts {
                match part {
                    Part::FunctionResponse(fr) => {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": fr.id,
                            "content": stringify_response(&fr.response),
                        }));
                    }
                    other => remaining.push(other),
                }
            }
            if remaining.is_empty() {
                continue;
            }

            if content.role == Role::Model && content.has_function_calls() {
                messages.push(assistant_with_tool_calls(&remaining));
                continue;
            }

            let role = match content.role {
                Role::Model => "assistant",
                Role::User => "user",
            };
            let has_image = remaining.iter().any(|p| {
                matches!(p, Part::InlineData { mime_type, .. } if mime_type.starts_with("image/"))
            });
            let body = if has_image && image_capable {
                multipart_content(&remaining)
            } else {
                JsonValue::String(joined_text(&remaining))
            };
            messages.push(json!({"role": role, "content": body}));
        }

        messages
    }

    // ========================================================================
    // Inbound translation
    // ========================================================================

    /// Translate a complete (non-streaming) wire response.
    fn parse_response(&self, body: &JsonValue) -> Result<GenerateResponse> {
        let mapping = &self.descriptor.response_mapping;

        let candidates = match body.get("choices").and_then(JsonValue::as_array) {
            Some(choices) if !choices.is_empty() => {
                let content_path = relative_choice_path(&mapping.content);
                let finish_path = relative_choice_path(&mapping.finish_reason);
                let calls_path = sibling_tool_calls_path(content_path);
                choices
                    .iter()
                    .map(|choice| build_candidate(choice, content_path, finish_path, &calls_path))
                    .collect()
            }
            // No choices array: fall back to the absolute descriptor
            // paths against the whole body.
            _ => {
                let text = paths::extract_str(body, &mapping.content);
                let finish = paths::extract_str(body, &mapping.finish_reason);
                if text.is_none() && finish.is_none() {
                    return Err(AdapterError::MalformedResponse(format!(
                        "response carries neither '{}' nor '{}'",
                        mapping.content, mapping.finish_reason
                    )));
                }
                vec![Candidate {
                    content: Content {
                        role: Role::Model,
                        parts: text.map(Part::text).into_iter().collect(),
                    },
                    finish_reason: finish.map(FinishReason::from_wire),
                }]
            }
        };

        Ok(GenerateResponse {
            candidates,
            usage: Some(self.parse_usage(body)),
        })
    }

    fn parse_usage(&self, body: &JsonValue) -> UsageMetadata {
        let usage = &self.descriptor.response_mapping.usage;
        UsageMetadata {
            prompt_tokens: paths::eval_sum(body, &usage.prompt_tokens),
            completion_tokens: paths::eval_sum(body, &usage.completion_tokens),
            total_tokens: paths::eval_sum(body, &usage.total_tokens),
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// POST `body` to a logical endpoint and return the parsed JSON
    /// response. Non-2xx statuses are classified via the descriptor.
    async fn post_json(
        &self,
        logical: &str,
        body: &Map<String, JsonValue>,
        context: &str,
    ) -> Result<JsonValue> {
        let url = self.url(logical)?;
        let headers = resolver::resolve_headers(&self.descriptor, &self.record);

        debug!(
            provider = %self.record.id,
            url = %url,
            context,
            "issuing provider request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(e, context))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::from_transport(e, context))?;

        if !status.is_success() {
            return Err(self.descriptor.error_handling.classify(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                &text,
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            AdapterError::MalformedResponse(format!("response body is not JSON: {e}"))
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiAdapter {
    async fn generate_content(
        &self,
        request: GenerateRequest,
        prompt_id: Option<&str>,
    ) -> Result<GenerateResponse> {
        debug!(
            provider = %self.record.id,
            model = %self.model,
            prompt_id = prompt_id.unwrap_or(""),
            contents = request.contents.len(),
            "generate_content"
        );
        let body = self.build_wire_request(&request, false);
        let wire = self.post_json(ENDPOINT_CHAT, &body, "chat completion").await?;
        self.parse_response(&wire)
    }

    async fn generate_content_stream(
        &self,
        request: GenerateRequest,
        prompt_id: Option<&str>,
    ) -> Result<BoxStream<'static, Result<GenerateResponse>>> {
        debug!(
            provider = %self.record.id,
            model = %self.model,
            prompt_id = prompt_id.unwrap_or(""),
            "generate_content_stream"
        );
        let url = self.url(ENDPOINT_CHAT)?;
        let headers = resolver::resolve_headers(&self.descriptor, &self.record);
        let body = self.build_wire_request(&request, true);

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_transport(e, "streaming setup"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.descriptor.error_handling.classify(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                &text,
            ));
        }

        let state = SseState {
            bytes: response.bytes_stream().boxed(),
            buffer: Vec::new(),
            accumulator: ToolCallAccumulator::new(),
            pending: VecDeque::new(),
            done: false,
            descriptor: Arc::clone(&self.descriptor),
        };

        Ok(futures::stream::unfold(state, drive_sse).boxed())
    }

    async fn count_tokens(&self, request: &GenerateRequest) -> Result<TokenCount> {
        match self.descriptor.token_counting.method {
            TokenCountingMethod::Estimation => Ok(TokenCount {
                total_tokens: estimate_tokens(&request.contents),
            }),
            TokenCountingMethod::ResponseUsage => {
                // The backend is the only accurate tokenizer we have, so
                // issue the chat request itself and read its usage block.
                // Generation-config overrides from the caller are ignored.
                let probe = GenerateRequest {
                    model: request.model.clone(),
                    contents: request.contents.clone(),
                    system_instruction: request.system_instruction.clone(),
                    config: None,
                };
                let body = self.build_wire_request(&probe, false);
                match self.post_json(ENDPOINT_CHAT, &body, "token counting").await {
                    Ok(wire) => Ok(TokenCount {
                        total_tokens: paths::eval_sum(
                            &wire,
                            &self.descriptor.response_mapping.usage.prompt_tokens,
                        ),
                    }),
                    Err(e) => {
                        warn!(
                            provider = %self.record.id,
                            error = %e,
                            "usage-based token count failed; falling back to estimation"
                        );
                        Ok(TokenCount {
                            total_tokens: estimate_tokens(&request.contents),
                        })
                    }
                }
            }
        }
    }

    async fn embed_content(&self, request: &GenerateRequest) -> Result<EmbedResponse> {
        if self.descriptor.endpoint(ENDPOINT_EMBEDDING).is_none() {
            return Err(AdapterError::OperationUnsupported(format!(
                "adapter '{}' declares no embedding endpoint",
                self.descriptor.adapter_type
            )));
        }

        let text = request
            .contents
            .iter()
            .map(Content::joined_text)
            .collect::<Vec<_>>()
            .join("\n");
        let mut body = Map::new();
        body.insert("model".to_string(), json!(EMBEDDING_MODEL));
        body.insert("input".to_string(), json!(text));

        let wire = self.post_json(ENDPOINT_EMBEDDING, &body, "embedding").await?;
        let values = paths::extract(&wire, "data[0].embedding")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                AdapterError::MalformedResponse(
                    "embedding response carries no data[0].embedding".to_string(),
                )
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(EmbedResponse {
            embeddings: vec![ContentEmbedding { values }],
        })
    }
}

// ============================================================================
// Outbound helpers
// ============================================================================

/// Stringify a tool response payload: strings pass through, everything
/// else is serialized as JSON.
fn stringify_response(response: &JsonValue) -> String {
    match response {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn joined_text(parts: &[&Part]) -> String {
    parts
        .iter()
        .filter_map(|p| p.as_text())
        .collect::<Vec<_>>()
        .join("")
}

/// One assistant message carrying the turn's text (or `null`) plus its
/// tool calls.
fn assistant_with_tool_calls(parts: &[&Part]) -> JsonValue {
    let text = joined_text(parts);
    let content = if text.is_empty() {
        JsonValue::Null
    } else {
        JsonValue::String(text)
    };

    let tool_calls: Vec<JsonValue> = parts
        .iter()
        .filter_map(|p| match p {
            Part::FunctionCall(fc) => Some(fc),
            _ => None,
        })
        .enumerate()
        .map(|(index, fc)| {
            let id = fc
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{index}"));
            json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": fc.name,
                    "arguments": JsonValue::Object(fc.args.clone()).to_string(),
                }
            })
        })
        .collect();

    json!({"role": "assistant", "content": content, "tool_calls": tool_calls})
}

/// Multipart body for a message with inline images.
fn multipart_content(parts: &[&Part]) -> JsonValue {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Part::Text(text) => out.push(json!({"type": "text", "text": text})),
            Part::InlineData { mime_type, data } if mime_type.starts_with("image/") => {
                out.push(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{mime_type};base64,{data}")}
                }));
            }
            _ => {}
        }
    }
    JsonValue::Array(out)
}

/// Append `suffix` to the text of the last user message. A conversation
/// with no user message is left untouched.
fn append_to_last_user_message(messages: &mut [JsonValue], suffix: &str) {
    for message in messages.iter_mut().rev() {
        if message.get("role").and_then(JsonValue::as_str) != Some("user") {
            continue;
        }
        match message.get_mut("content") {
            Some(JsonValue::String(text)) => text.push_str(suffix),
            Some(JsonValue::Array(parts)) => {
                for part in parts.iter_mut().rev() {
                    if part.get("type").and_then(JsonValue::as_str) != Some("text") {
                        continue;
                    }
                    if let Some(JsonValue::String(text)) = part.get_mut("text") {
                        text.push_str(suffix);
                    }
                    break;
                }
            }
            _ => {}
        }
        return;
    }
}

// ============================================================================
// Inbound helpers
// ============================================================================

/// Strip the leading `choices[<n>].` from a descriptor path, yielding the
/// path relative to one choice element. Paths that do not start that way
/// are used as-is.
fn relative_choice_path(path: &str) -> &str {
    if path.starts_with("choices[") {
        match path.find("].") {
            Some(pos) => &path[pos + 2..],
            None => path,
        }
    } else {
        path
    }
}

/// `tool_calls` lives next to the content field: derive its path from the
/// content path's parent (`message.content` → `message.tool_calls`).
fn sibling_tool_calls_path(relative_content: &str) -> String {
    match relative_content.rsplit_once('.') {
        Some((parent, _)) => format!("{parent}.tool_calls"),
        None => "tool_calls".to_string(),
    }
}

fn build_candidate(
    choice: &JsonValue,
    content_path: &str,
    finish_path: &str,
    calls_path: &str,
) -> Candidate {
    let mut parts = Vec::new();

    if let Some(text) = paths::extract_str(choice, content_path) {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }

    if let Some(calls) = paths::extract(choice, calls_path).and_then(JsonValue::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let name = paths::extract_str(call, "function.name")
                .unwrap_or_default()
                .to_string();
            let raw_args = paths::extract_str(call, "function.arguments").unwrap_or_default();
            parts.push(Part::FunctionCall(FunctionCall {
                id: paths::extract_str(call, "id")
                    .map(str::to_string)
                    .or_else(|| Some(format!("call_{index}"))),
                args: parse_tool_arguments(raw_args, &name),
                name,
            }));
        }
    }

    Candidate {
        content: Content {
            role: Role::Model,
            parts,
        },
        finish_reason: paths::extract_str(choice, finish_path).map(FinishReason::from_wire),
    }
}

// ============================================================================
// SSE streaming
// ============================================================================

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    accumulator: ToolCallAccumulator,
    pending: VecDeque<Result<GenerateResponse>>,
    done: bool,
    descriptor: Arc<AdapterDescriptor>,
}

/// Drive the SSE body: pull network chunks, split them into `data:`
/// lines, and turn those into canonical chunks. One network read may
/// yield several emissions; they queue in `pending`.
async fn drive_sse(mut state: SseState) -> Option<(Result<GenerateResponse>, SseState)> {
    loop {
        if let Some(item) = state.pending.pop_front() {
            return Some((item, state));
        }
        if state.done {
            return None;
        }
        match state.bytes.next().await {
            None => {
                state.done = true;
            }
            Some(Err(e)) => {
                // A broken reader invalidates any half-assembled calls.
                state.accumulator.clear();
                state.done = true;
                state
                    .pending
                    .push_back(Err(AdapterError::from_transport(e, "stream read")));
            }
            Some(Ok(chunk)) => {
                state.buffer.extend_from_slice(&chunk);
                while let Some(newline) = state.buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = state.buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        state.done = true;
                        break;
                    }
                    match serde_json::from_str::<JsonValue>(payload) {
                        Ok(envelope) => {
                            if let Some(emission) = process_stream_chunk(
                                &state.descriptor,
                                &envelope,
                                &mut state.accumulator,
                            ) {
                                state.pending.push_back(Ok(emission));
                            }
                        }
                        Err(e) => {
                            // The stream survives a garbled envelope.
                            warn!(error = %e, payload, "skipping unparseable stream chunk");
                        }
                    }
                }
            }
        }
    }
}

/// Fold one parsed SSE envelope into the accumulator, returning a
/// canonical chunk when there is something to emit.
///
/// Text deltas emit immediately; tool-call deltas only accumulate. The
/// chunk carrying a finish reason drains the accumulator into a single
/// terminal emission whose parts are this chunk's text followed by the
/// assembled calls.
fn process_stream_chunk(
    descriptor: &AdapterDescriptor,
    envelope: &JsonValue,
    accumulator: &mut ToolCallAccumulator,
) -> Option<GenerateResponse> {
    let mapping = &descriptor.response_mapping;
    let content_path = mapping
        .stream_content
        .as_deref()
        .unwrap_or("choices[0].delta.content");
    let finish_path = mapping
        .stream_finish_reason
        .as_deref()
        .unwrap_or("choices[0].finish_reason");
    let calls_path = sibling_tool_calls_path(relative_choice_path(content_path));

    let text = paths::extract_str(envelope, content_path)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let choice = paths::extract(envelope, "choices[0]").unwrap_or(envelope);
    if let Some(deltas) = paths::extract(choice, &calls_path).and_then(JsonValue::as_array) {
        for delta in deltas {
            let index = paths::extract_u64(delta, "index").unwrap_or(0) as usize;
            accumulator.absorb(
                index,
                paths::extract_str(delta, "id"),
                paths::extract_str(delta, "function.name"),
                paths::extract_str(delta, "function.arguments"),
            );
        }
    }

    let finish = paths::extract_str(envelope, finish_path);

    if let Some(reason) = finish {
        let mut parts: Vec<Part> = text.map(Part::Text).into_iter().collect();
        parts.extend(accumulator.drain().into_iter().map(Part::FunctionCall));

        let usage = UsageMetadata {
            prompt_tokens: paths::eval_sum(envelope, &mapping.usage.prompt_tokens),
            completion_tokens: paths::eval_sum(envelope, &mapping.usage.completion_tokens),
            total_tokens: paths::eval_sum(envelope, &mapping.usage.total_tokens),
        };
        return Some(GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Role::Model,
                    parts,
                },
                finish_reason: Some(FinishReason::from_wire(reason)),
            }],
            usage: (usage.total_tokens > 0).then_some(usage),
        });
    }

    text.map(|t| GenerateResponse {
        candidates: vec![Candidate {
            content: Content {
                role: Role::Model,
                parts: vec![Part::Text(t)],
            },
            finish_reason: None,
        }],
        usage: None,
    })
}

//! Deterministic mock adapter for tests.
//!
//! Registered under the `mock` adapter type so factory-level code paths
//! can be exercised without network access. Responses are queued ahead of
//! time and consumed in order; an empty queue yields a fixed fallback.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::canonical::{
    estimate_tokens, Candidate, Content, ContentEmbedding, ContentGenerator, EmbedResponse,
    FinishReason, FunctionCall, GenerateRequest, GenerateResponse, Part, Role, TokenCount,
    UsageMetadata,
};
use crate::error::Result;

/// One scripted reply.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

impl MockTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }

    pub fn with_function_call(mut self, call: FunctionCall) -> Self {
        self.function_calls.push(call);
        self
    }
}

/// Queue-backed [`ContentGenerator`] that never touches the network.
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    turns: Arc<Mutex<VecDeque<MockTurn>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reply.
    pub async fn push_turn(&self, turn: MockTurn) {
        self.turns.lock().await.push_back(turn);
    }

    async fn next_turn(&self) -> MockTurn {
        self.turns
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| MockTurn::text("mock response"))
    }

    fn to_response(turn: MockTurn) -> GenerateResponse {
        let mut parts = Vec::new();
        if !turn.text.is_empty() {
            parts.push(Part::text(turn.text));
        }
        parts.extend(turn.function_calls.into_iter().map(Part::FunctionCall));
        GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Role::Model,
                    parts,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(UsageMetadata {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
        }
    }
}

#[async_trait]
impl ContentGenerator for MockAdapter {
    async fn generate_content(
        &self,
        _request: GenerateRequest,
        _prompt_id: Option<&str>,
    ) -> Result<GenerateResponse> {
        Ok(Self::to_response(self.next_turn().await))
    }

    async fn generate_content_stream(
        &self,
        _request: GenerateRequest,
        _prompt_id: Option<&str>,
    ) -> Result<BoxStream<'static, Result<GenerateResponse>>> {
        let turn = self.next_turn().await;

        // Mirror the real streaming contract: text arrives first as a
        // bare chunk, the terminal chunk carries calls + finish reason.
        let mut chunks = Vec::new();
        if !turn.text.is_empty() {
            chunks.push(Ok(GenerateResponse {
                candidates: vec![Candidate {
                    content: Content {
                        role: Role::Model,
                        parts: vec![Part::text(turn.text.clone())],
                    },
                    finish_reason: None,
                }],
                usage: None,
            }));
        }
        chunks.push(Ok(GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Role::Model,
                    parts: turn
                        .function_calls
                        .into_iter()
                        .map(Part::FunctionCall)
                        .collect(),
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: None,
        }));

        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn count_tokens(&self, request: &GenerateRequest) -> Result<TokenCount> {
        Ok(TokenCount {
            total_tokens: estimate_tokens(&request.contents),
        })
    }

    async fn embed_content(&self, _request: &GenerateRequest) -> Result<EmbedResponse> {
        Ok(EmbedResponse {
            embeddings: vec![ContentEmbedding {
                values: vec![0.0; 8],
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_turns_in_order() {
        let mock = MockAdapter::new();
        mock.push_turn(MockTurn::text("first")).await;
        mock.push_turn(MockTurn::text("second")).await;

        let req = GenerateRequest::new("m", vec![Content::user_text("hi")]);
        let a = mock.generate_content(req.clone(), None).await.unwrap();
        let b = mock.generate_content(req.clone(), None).await.unwrap();
        let c = mock.generate_content(req, None).await.unwrap();

        assert_eq!(a.text(), Some("first".to_string()));
        assert_eq!(b.text(), Some("second".to_string()));
        assert_eq!(c.text(), Some("mock response".to_string()));
    }

    #[tokio::test]
    async fn test_stream_shape() {
        let mock = MockAdapter::new();
        mock.push_turn(
            MockTurn::text("thinking").with_function_call(FunctionCall {
                id: Some("t1".to_string()),
                name: "probe".to_string(),
                args: serde_json::Map::new(),
            }),
        )
        .await;

        let req = GenerateRequest::new("m", vec![Content::user_text("go")]);
        let chunks: Vec<_> = mock
            .generate_content_stream(req, None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.text(), Some("thinking".to_string()));
        assert_eq!(first.finish_reason(), None);

        let last = chunks[1].as_ref().unwrap();
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(last.function_calls().len(), 1);
    }
}

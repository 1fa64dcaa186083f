//! Streaming tests for the OpenAI-family adapter: SSE framing, text
//! deltas, and tool-call reassembly across chunks.

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use conduit_llm::{
    AdapterError, AdapterRegistry, Content, ContentGenerator, FinishReason, GenerateRequest, Part,
    ProviderRecord,
};

fn record_for(server: &MockServer) -> ProviderRecord {
    serde_json::from_value(json!({
        "id": "stream-provider",
        "name": "Stream Provider",
        "adapterType": "openai",
        "baseUrl": server.uri(),
        "apiKey": "sk-test",
        "models": ["gpt-4o-mini"],
    }))
    .unwrap()
}

fn adapter_for(server: &MockServer) -> Box<dyn ContentGenerator> {
    AdapterRegistry::with_builtins()
        .make_adapter(&record_for(server), Some("gpt-4o-mini"))
        .unwrap()
}

async fn mount_sse(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"))
        .mount(server)
        .await;
}

async fn collect(
    adapter: &dyn ContentGenerator,
) -> Vec<conduit_llm::Result<conduit_llm::GenerateResponse>> {
    adapter
        .generate_content_stream(
            GenerateRequest::new("gpt-4o-mini", vec![Content::user_text("go")]),
            None,
        )
        .await
        .unwrap()
        .collect()
        .await
}

#[tokio::test]
async fn text_deltas_stream_in_order() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hel\"}}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    let texts: Vec<String> = chunks
        .iter()
        .map(|c| c.as_ref().unwrap().text().unwrap_or_default())
        .collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(texts[0], "hel");
    assert_eq!(texts[1], "lo");
    assert_eq!(
        chunks[2].as_ref().unwrap().finish_reason(),
        Some(FinishReason::Stop)
    );
}

#[tokio::test]
async fn tool_call_fragments_reassemble_into_terminal_chunk() {
    let server = MockServer::start().await;
    // Fragments of one call at index 0: name first, then the arguments
    // split across two chunks, then the finish.
    let sse = "\
data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t1\",\"function\":{\"name\":\"runShell\"}}]}}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"cmd\\\":\"}}]}}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"ls\\\"}\"}}]}}]}\n\n\
data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    // Exactly one emission: nothing leaks before the terminal chunk.
    assert_eq!(chunks.len(), 1);
    let terminal = chunks[0].as_ref().unwrap();
    assert_eq!(terminal.finish_reason(), Some(FinishReason::Stop));
    let calls = terminal.function_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id.as_deref(), Some("t1"));
    assert_eq!(calls[0].name, "runShell");
    assert_eq!(calls[0].args.get("cmd"), Some(&json!("ls")));
}

#[tokio::test]
async fn parallel_tool_calls_emitted_once_each() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"a\",\"function\":{\"name\":\"first\",\"arguments\":\"{}\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"b\",\"function\":{\"name\":\"second\",\"arguments\":\"{}\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    assert_eq!(chunks.len(), 1);
    let calls_in_order: Vec<&str> = chunks[0]
        .as_ref()
        .unwrap()
        .function_calls()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(calls_in_order, vec!["first", "second"]);
}

#[tokio::test]
async fn empty_tool_deltas_with_finish_emit_bare_terminal_chunk() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    assert_eq!(chunks.len(), 1);
    let terminal = chunks[0].as_ref().unwrap();
    assert_eq!(terminal.finish_reason(), Some(FinishReason::Stop));
    assert!(terminal.candidates[0].content.parts.is_empty());
}

#[tokio::test]
async fn empty_arguments_across_all_chunks_yield_empty_args() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t1\",\"function\":{\"name\":\"noArgs\",\"arguments\":\"\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    let calls = chunks[0].as_ref().unwrap().function_calls().len();
    assert_eq!(calls, 1);
    assert!(chunks[0].as_ref().unwrap().function_calls()[0]
        .args
        .is_empty());
}

#[tokio::test]
async fn unparseable_chunk_envelopes_are_skipped() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n\
data: {this is not json}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    // The garbled line is dropped; the stream still completes cleanly.
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.is_ok()));
    assert_eq!(
        chunks[1].as_ref().unwrap().finish_reason(),
        Some(FinishReason::Stop)
    );
}

#[tokio::test]
async fn text_and_finish_share_terminal_chunk_with_text_first() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t1\",\"function\":{\"name\":\"f\",\"arguments\":\"{}\"}}]}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"done\"},\"finish_reason\":\"tool_calls\"}]}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    assert_eq!(chunks.len(), 1);
    let parts = &chunks[0].as_ref().unwrap().candidates[0].content.parts;
    assert!(matches!(&parts[0], Part::Text(t) if t == "done"));
    assert!(matches!(&parts[1], Part::FunctionCall(_)));
}

#[tokio::test]
async fn terminal_usage_is_surfaced() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\n\n\
data: [DONE]\n\n";
    mount_sse(&server, sse).await;

    let adapter = adapter_for(&server);
    let chunks = collect(adapter.as_ref()).await;

    let usage = chunks
        .last()
        .unwrap()
        .as_ref()
        .unwrap()
        .usage
        .expect("terminal chunk carries usage");
    assert_eq!(usage.total_tokens, 6);
}

#[tokio::test]
async fn http_error_on_stream_setup_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "slow down"}
        })))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let err = adapter
        .generate_content_stream(
            GenerateRequest::new("gpt-4o-mini", vec![Content::user_text("go")]),
            None,
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AdapterError::RateLimited { status: 429, .. }));
}

#[tokio::test]
async fn streaming_setup_timeout_has_distinct_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: [DONE]\n\n".to_string(), "text/event-stream")
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut record = record_for(&server);
    record
        .provider_overrides
        .insert("timeout".to_string(), json!(1));
    let adapter = AdapterRegistry::with_builtins()
        .make_adapter(&record, Some("gpt-4o-mini"))
        .unwrap();

    let err = adapter
        .generate_content_stream(
            GenerateRequest::new("gpt-4o-mini", vec![Content::user_text("go")]),
            None,
        )
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("streaming setup"));
}

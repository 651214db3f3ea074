//! OpenAI ⇄ Anthropic dialect translation, including SSE transcoding.
//!
//! Non-streaming request/response shapes follow the Anthropic Messages API
//! (2023-06-01). Streaming transcodes Anthropic SSE events into OpenAI
//! `chat.completion.chunk` objects one event at a time.

use serde_json::{json, Value};
use std::collections::HashMap;

use super::types::{Content, ContentPart, Message, NormalizedResponse, Role, ToolChoice, ToolDefinition, Usage};
use crate::error::AppError;

pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Builds an Anthropic Messages request body from OpenAI-shaped messages.
///
/// System messages are extracted and concatenated into the top-level
/// `system` field; tool-result messages become `role=user` with a
/// `tool_result` part; assistant messages with tool calls become `text` then
/// `tool_use` parts.
pub fn to_anthropic(
    messages: &[Message],
    tools: &[ToolDefinition],
    tool_choice: Option<&ToolChoice>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    stop_sequences: &[String],
    model: &str,
    stream: bool,
) -> Value {
    let mut system_parts = Vec::new();
    let mut anthropic_messages = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            system_parts.push(msg.text_content());
            continue;
        }
        anthropic_messages.push(message_to_anthropic(msg));
    }

    let mut body = json!({
        "model": model,
        "messages": anthropic_messages,
        "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
    });

    if !system_parts.is_empty() {
        body["system"] = json!(system_parts.join("\n\n"));
    }
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }
    if !stop_sequences.is_empty() {
        body["stop_sequences"] = json!(stop_sequences);
    }
    if !tools.is_empty() {
        body["tools"] = json!(tools
            .iter()
            .map(|t| json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            }))
            .collect::<Vec<_>>());
    }
    if let Some(choice) = tool_choice {
        body["tool_choice"] = tool_choice_to_anthropic(choice);
    }

    body
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "type": "auto" }),
        ToolChoice::None => json!({ "type": "none" }),
        ToolChoice::Required => json!({ "type": "any" }),
        ToolChoice::Named(name) => json!({ "type": "tool", "name": name }),
    }
}

fn message_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        Content::Text(text) => json!({ "role": role_str(msg.role), "content": text }),
        Content::Parts(parts) => {
            // Tool results are surfaced on the user turn per the Anthropic wire shape.
            let has_tool_result = parts.iter().any(|p| matches!(p, ContentPart::ToolResult { .. }));
            let role = if has_tool_result { "user" } else { role_str(msg.role) };
            let anthropic_parts: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::ImageInlineBase64 { mime_type, data } => json!({
                        "type": "image",
                        "source": { "type": "base64", "media_type": mime_type, "data": data },
                    }),
                    ContentPart::ImageUrl { url } => json!({ "type": "text", "text": format!("[Image: {url}]") }),
                    ContentPart::ToolUse { id, name, input } => {
                        json!({ "type": "tool_use", "id": id, "name": name, "input": input })
                    }
                    ContentPart::ToolResult { tool_use_id, content, is_error } => json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }),
                })
                .collect();
            json!({ "role": role, "content": anthropic_parts })
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "user", // extracted earlier; unreachable in practice
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
    }
}

/// Converts a full (non-streaming) Anthropic response body into the
/// normalized response shape the OpenAI-dialect frontend serializes.
pub fn from_anthropic(body: &Value) -> Result<NormalizedResponse, AppError> {
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::internal("anthropic response missing `content` array"))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut saw_text = false;

    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                saw_text = true;
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or(json!({}));
                tool_calls.push((id, name, input));
            }
            _ => {}
        }
    }

    if !saw_text && tool_calls.is_empty() {
        return Err(AppError::internal("anthropic response has no text or tool_use block"));
    }

    let stop_reason = body.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");
    let finish_reason = match stop_reason {
        "tool_use" => "tool_calls",
        "end_turn" => "stop",
        other => other,
    }
    .to_string();

    let usage = Usage {
        prompt_tokens: body.get("usage").and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: body.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0),
    };

    Ok(NormalizedResponse { text, tool_calls, finish_reason, usage, raw: body.clone() })
}

/// Serializes a [`NormalizedResponse`] into an OpenAI chat-completion body.
pub fn normalized_to_openai_response(resp: &NormalizedResponse, model: &str) -> Value {
    let mut message = json!({ "role": "assistant", "content": if resp.text.is_empty() { Value::Null } else { json!(resp.text) } });

    if !resp.tool_calls.is_empty() {
        let tool_calls: Vec<Value> = resp
            .tool_calls
            .iter()
            .map(|(id, name, input)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() },
                })
            })
            .collect();
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": resp.finish_reason,
        }],
        "usage": {
            "prompt_tokens": resp.usage.prompt_tokens,
            "completion_tokens": resp.usage.completion_tokens,
            "total_tokens": resp.usage.total(),
        },
    })
}

/// Streaming SSE transcoder: Anthropic event stream in, OpenAI
/// `chat.completion.chunk` SSE lines out.
///
/// Holds a two-line (`event:`/`data:`) parse buffer plus per-block tool-call
/// accumulation state, so a single instance must own one upstream stream.
#[derive(Default)]
pub struct AnthropicSseTranscoder {
    pending_event: Option<String>,
    byte_buf: Vec<u8>,
    tool_call_index: HashMap<u64, usize>,
    next_tool_index: usize,
    model: String,
    emitted_role_chunk: bool,
}

impl AnthropicSseTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }

    /// Feeds raw upstream bytes (possibly splitting UTF-8 across calls) and
    /// returns zero or more fully-formed OpenAI SSE lines (`"data: ...\n\n"`).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(newline) = self.byte_buf.iter().position(|&b| b == b'\n') else { break };
            let line_bytes: Vec<u8> = self.byte_buf.drain(..=newline).collect();
            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                // Partial UTF-8 boundary split across chunks; wait for more bytes.
                self.byte_buf.splice(0..0, line_bytes);
                break;
            };
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(event) = line.strip_prefix("event:") {
                self.pending_event = Some(event.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                if let Some(chunk) = self.handle_event(data.trim()) {
                    out.push(chunk);
                }
            } else if line.is_empty() {
                self.pending_event = None;
            }
        }

        out
    }

    fn handle_event(&mut self, data: &str) -> Option<String> {
        let event_type = self.pending_event.clone().unwrap_or_default();
        let parsed: Value = serde_json::from_str(data).ok()?; // malformed JSON dropped silently

        match event_type.as_str() {
            "message_start" => {
                self.emitted_role_chunk = true;
                Some(openai_chunk_line(&self.model, json!({ "role": "assistant" }), None))
            }
            "content_block_start" => {
                let block = parsed.get("content_block")?;
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let index = parsed.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let tool_index = self.next_tool_index;
                    self.tool_call_index.insert(index, tool_index);
                    self.next_tool_index += 1;
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                    Some(openai_chunk_line(
                        &self.model,
                        json!({ "tool_calls": [{
                            "index": tool_index,
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": "" },
                        }]}),
                        None,
                    ))
                } else {
                    None
                }
            }
            "content_block_delta" => {
                let delta = parsed.get("delta")?;
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        Some(openai_chunk_line(&self.model, json!({ "content": text }), None))
                    }
                    Some("input_json_delta") => {
                        let index = parsed.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let tool_index = *self.tool_call_index.get(&index)?;
                        let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                        Some(openai_chunk_line(
                            &self.model,
                            json!({ "tool_calls": [{
                                "index": tool_index,
                                "function": { "arguments": partial },
                            }]}),
                            None,
                        ))
                    }
                    _ => None,
                }
            }
            "message_delta" => {
                let stop_reason = parsed.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str);
                let finish_reason = stop_reason.map(|r| match r {
                    "tool_use" => "tool_calls",
                    "end_turn" => "stop",
                    other => other,
                });
                finish_reason.map(|fr| openai_chunk_line(&self.model, json!({}), Some(fr)))
            }
            "message_stop" => Some("data: [DONE]\n\n".to_string()),
            _ => None,
        }
    }
}

fn openai_chunk_line(model: &str, delta: Value, finish_reason: Option<&str>) -> String {
    let chunk = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    format!("data: {}\n\n", chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::types::Message;

    #[test]
    fn to_anthropic_extracts_system_message_to_top_level() {
        let messages = vec![Message::text(Role::System, "be terse"), Message::text(Role::User, "hi")];
        let body = to_anthropic(&messages, &[], None, None, None, &[], "claude-3-5-haiku-20241022", false);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn to_anthropic_concatenates_multiple_system_messages() {
        let messages =
            vec![Message::text(Role::System, "a"), Message::text(Role::System, "b"), Message::text(Role::User, "hi")];
        let body = to_anthropic(&messages, &[], None, None, None, &[], "m", false);
        assert_eq!(body["system"], "a\n\nb");
    }

    #[test]
    fn to_anthropic_defaults_max_tokens() {
        let messages = vec![Message::text(Role::User, "hi")];
        let body = to_anthropic(&messages, &[], None, None, None, &[], "m", false);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn from_anthropic_maps_end_turn_to_stop() {
        let body = json!({
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let resp = from_anthropic(&body).unwrap();
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.text, "hi");
    }

    #[test]
    fn from_anthropic_s5_scenario() {
        let body = json!({
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "abc", "name": "search", "input": {"q": "x"}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let resp = from_anthropic(&body).unwrap();
        let openai = normalized_to_openai_response(&resp, "claude-3-5-sonnet-20241022");
        assert_eq!(openai["choices"][0]["message"]["content"], "hi");
        assert_eq!(openai["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(openai["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"], "{\"q\":\"x\"}");
        assert_eq!(openai["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(openai["usage"]["prompt_tokens"], 10);
        assert_eq!(openai["usage"]["completion_tokens"], 5);
        assert_eq!(openai["usage"]["total_tokens"], 15);
    }

    #[test]
    fn from_anthropic_errors_when_no_text_block_present() {
        let body = json!({ "content": [], "stop_reason": "end_turn", "usage": {} });
        assert!(from_anthropic(&body).is_err());
    }

    #[test]
    fn sse_transcoder_streams_text_deltas_in_order() {
        let mut t = AnthropicSseTranscoder::new("claude-3-5-haiku-20241022");
        let events = [
            ("message_start", json!({"message": {"role": "assistant"}})),
            ("content_block_start", json!({"index": 0, "content_block": {"type": "text", "text": ""}})),
            ("content_block_delta", json!({"index": 0, "delta": {"type": "text_delta", "text": "hel"}})),
            ("content_block_delta", json!({"index": 0, "delta": {"type": "text_delta", "text": "lo"}})),
            ("message_delta", json!({"delta": {"stop_reason": "end_turn"}})),
            ("message_stop", json!({})),
        ];

        let mut concatenated = String::new();
        for (event, data) in events {
            let raw = format!("event: {event}\ndata: {}\n\n", data);
            for line in t.push(raw.as_bytes()) {
                if let Some(json_part) = line.strip_prefix("data: ") {
                    if json_part.trim() == "[DONE]" {
                        continue;
                    }
                    let v: Value = serde_json::from_str(json_part.trim()).unwrap();
                    if let Some(c) = v["choices"][0]["delta"]["content"].as_str() {
                        concatenated.push_str(c);
                    }
                }
            }
        }
        assert_eq!(concatenated, "hello");
    }

    #[test]
    fn sse_transcoder_preserves_tool_call_arguments() {
        let mut t = AnthropicSseTranscoder::new("m");
        let events = [
            ("content_block_start", json!({"index": 0, "content_block": {"type": "tool_use", "id": "t1", "name": "search"}})),
            ("content_block_delta", json!({"index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}})),
            ("content_block_delta", json!({"index": 0, "delta": {"type": "input_json_delta", "partial_json": "\"x\"}"}})),
        ];
        let mut args = String::new();
        for (event, data) in events {
            let raw = format!("event: {event}\ndata: {}\n\n", data);
            for line in t.push(raw.as_bytes()) {
                let json_part = line.strip_prefix("data: ").unwrap().trim();
                let v: Value = serde_json::from_str(json_part).unwrap();
                if let Some(tc) = v["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str() {
                    args.push_str(tc);
                }
            }
        }
        assert_eq!(args, "{\"q\":\"x\"}");
        let parsed: Value = serde_json::from_str(&args).unwrap();
        assert_eq!(parsed["q"], "x");
    }

    #[test]
    fn sse_transcoder_drops_malformed_json_silently() {
        let mut t = AnthropicSseTranscoder::new("m");
        let out = t.push(b"event: content_block_delta\ndata: {not json}\n\n");
        assert!(out.is_empty());
    }

    #[test]
    fn sse_transcoder_handles_split_utf8_boundary() {
        let mut t = AnthropicSseTranscoder::new("m");
        let raw = "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"caf\\u00e9\"}}\n\n";
        let bytes = raw.as_bytes();
        let mid = bytes.len() / 2;
        let mut out = t.push(&bytes[..mid]);
        out.extend(t.push(&bytes[mid..]));
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("caf"));
    }
}

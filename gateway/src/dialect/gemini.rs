//! OpenAI ⇄ Gemini dialect translation, including SSE transcoding.

use serde_json::{json, Value};

use super::types::{Content, ContentPart, Message, NormalizedResponse, Role, Usage};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Builds a Gemini `generateContent`/`streamGenerateContent` request body.
pub fn to_gemini(messages: &[Message], max_tokens: Option<u32>, temperature: Option<f64>) -> Value {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            system_parts.push(msg.text_content());
            continue;
        }
        let role = if msg.role == Role::Assistant { "model" } else { "user" };
        contents.push(json!({ "role": role, "parts": message_to_gemini_parts(msg) }));
    }

    let mut generation_config = json!({ "maxOutputTokens": max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS) });
    if let Some(t) = temperature {
        generation_config["temperature"] = json!(t);
    }

    let mut body = json!({ "contents": contents, "generationConfig": generation_config });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system_parts.join("\n\n") }] });
    }
    body
}

fn message_to_gemini_parts(msg: &Message) -> Vec<Value> {
    match &msg.content {
        Content::Text(text) => vec![json!({ "text": text })],
        Content::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => json!({ "text": text }),
                ContentPart::ImageInlineBase64 { mime_type, data } => {
                    json!({ "inline_data": { "mime_type": mime_type, "data": data } })
                }
                ContentPart::ImageUrl { url } => json!({ "text": format!("[Image: {url}]") }),
                ContentPart::ToolUse { name, input, .. } => json!({ "functionCall": { "name": name, "args": input } }),
                ContentPart::ToolResult { content, .. } => json!({ "text": content }),
            })
            .collect(),
    }
}

/// Converts a full (non-streaming) Gemini `generateContent` response into the
/// normalized response shape.
pub fn from_gemini(body: &Value) -> NormalizedResponse {
    let candidate = &body["candidates"][0];
    let text = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish_reason = match candidate.get("finishReason").and_then(Value::as_str) {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") => "content_filter",
        _ => "stop",
    }
    .to_string();

    let usage = Usage {
        prompt_tokens: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
        completion_tokens: body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
    };

    NormalizedResponse { text, tool_calls: Vec::new(), finish_reason, usage, raw: body.clone() }
}

/// Streaming SSE transcoder: each `data:` JSON line is one Gemini candidate
/// chunk; the first chunk carries the assistant role, later ones carry text.
#[derive(Default)]
pub struct GeminiSseTranscoder {
    byte_buf: Vec<u8>,
    model: String,
    emitted_role: bool,
}

impl GeminiSseTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(newline) = self.byte_buf.iter().position(|&b| b == b'\n') else { break };
            let line_bytes: Vec<u8> = self.byte_buf.drain(..=newline).collect();
            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                self.byte_buf.splice(0..0, line_bytes);
                break;
            };
            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim();
            let Ok(parsed) = serde_json::from_str::<Value>(data) else { continue };

            let candidate = &parsed["candidates"][0];
            let text: String = candidate["content"]["parts"]
                .as_array()
                .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect())
                .unwrap_or_default();

            let mut delta = json!({});
            if !self.emitted_role {
                delta["role"] = json!("assistant");
                self.emitted_role = true;
            }
            if !text.is_empty() {
                delta["content"] = json!(text);
            }

            let finish_reason = candidate.get("finishReason").and_then(Value::as_str).map(|r| match r {
                "MAX_TOKENS" => "length",
                "SAFETY" => "content_filter",
                _ => "stop",
            });

            out.push(chunk_line(&self.model, delta, finish_reason));
            if finish_reason.is_some() {
                out.push("data: [DONE]\n\n".to_string());
            }
        }

        out
    }
}

fn chunk_line(model: &str, delta: Value, finish_reason: Option<&str>) -> String {
    let chunk = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
    });
    format!("data: {}\n\n", chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::types::Message;

    #[test]
    fn to_gemini_extracts_system_instruction() {
        let messages = vec![Message::text(Role::System, "be terse"), Message::text(Role::User, "hi")];
        let body = to_gemini(&messages, None, None);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn to_gemini_maps_assistant_role_to_model() {
        let messages = vec![Message::text(Role::Assistant, "hi")];
        let body = to_gemini(&messages, None, None);
        assert_eq!(body["contents"][0]["role"], "model");
    }

    #[test]
    fn from_gemini_maps_max_tokens_finish_reason() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2},
        });
        let resp = from_gemini(&body);
        assert_eq!(resp.finish_reason, "length");
        assert_eq!(resp.usage.prompt_tokens, 3);
    }

    #[test]
    fn sse_transcoder_first_chunk_carries_role() {
        let mut t = GeminiSseTranscoder::new("gemini-1.5-pro");
        let raw = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hi\"}]}}]}\n\n";
        let out = t.push(raw.as_bytes());
        let v: Value = serde_json::from_str(out[0].strip_prefix("data: ").unwrap().trim()).unwrap();
        assert_eq!(v["choices"][0]["delta"]["role"], "assistant");
    }

    #[test]
    fn sse_transcoder_emits_done_on_finish_reason() {
        let mut t = GeminiSseTranscoder::new("m");
        let raw = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]},\"finishReason\":\"STOP\"}]}\n\n";
        let out = t.push(raw.as_bytes());
        assert_eq!(out.last().unwrap(), "data: [DONE]\n\n");
    }
}

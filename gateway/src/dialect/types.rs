//! Normalized request/response types shared by every dialect translator.
//!
//! These are the pipeline's internal representation — OpenAI and Anthropic
//! wire shapes are parsed into these types at the edge and serialized back
//! out at the edge; nothing in routing, classification, or dispatch touches
//! a dialect-specific struct directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. Tagged union mirroring the spec's content-part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageInlineBase64 { mime_type: String, data: String },
    ImageUrl { url: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

/// Message content is either a bare string or a sequence of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self { role, content: Content::Text(text.into()) }
    }

    /// Concatenated text of every text-bearing part, used by the classifiers.
    pub fn text_content(&self) -> String {
        match &self.content {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::ToolResult { content, .. } => Some(content.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn tool_use_parts(&self) -> Vec<&ContentPart> {
        match &self.content {
            Content::Parts(parts) => parts.iter().filter(|p| matches!(p, ContentPart::ToolUse { .. })).collect(),
            Content::Text(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema for the tool's input, named `parameters` in OpenAI and
    /// `input_schema` in Anthropic — kept as a bare schema value here.
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

/// A fully parsed, dialect-neutral chat request. Immutable after parse; the
/// pipeline clones into a target request rather than mutating this in place.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub stream: bool,
}

/// Usage accounting, normalized across providers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A fully parsed, dialect-neutral chat response.
#[derive(Debug, Clone)]
pub struct NormalizedResponse {
    pub text: String,
    pub tool_calls: Vec<(String, String, Value)>, // (id, name, input)
    pub finish_reason: String,
    pub usage: Usage,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAiChat,
    AnthropicMessages,
}

fn parse_role(s: Option<&str>) -> Role {
    match s {
        Some("system") => Role::System,
        Some("assistant") => Role::Assistant,
        Some("tool") => Role::Tool,
        _ => Role::User,
    }
}

fn parse_openai_content(value: &Value) -> Content {
    match value {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(parts) => Content::Parts(
            parts
                .iter()
                .filter_map(|p| match p.get("type").and_then(Value::as_str) {
                    Some("text") => p.get("text").and_then(Value::as_str).map(|t| ContentPart::Text { text: t.to_string() }),
                    Some("image_url") => {
                        p.pointer("/image_url/url").and_then(Value::as_str).map(|u| ContentPart::ImageUrl { url: u.to_string() })
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => Content::Text(String::new()),
    }
}

fn parse_anthropic_content(value: &Value) -> Content {
    match value {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(parts) => Content::Parts(
            parts
                .iter()
                .filter_map(|p| match p.get("type").and_then(Value::as_str) {
                    Some("text") => p.get("text").and_then(Value::as_str).map(|t| ContentPart::Text { text: t.to_string() }),
                    Some("image") => {
                        let mime_type = p.pointer("/source/media_type").and_then(Value::as_str)?.to_string();
                        let data = p.pointer("/source/data").and_then(Value::as_str)?.to_string();
                        Some(ContentPart::ImageInlineBase64 { mime_type, data })
                    }
                    Some("tool_use") => {
                        let id = p.get("id").and_then(Value::as_str)?.to_string();
                        let name = p.get("name").and_then(Value::as_str)?.to_string();
                        let input = p.get("input").cloned().unwrap_or(Value::Null);
                        Some(ContentPart::ToolUse { id, name, input })
                    }
                    Some("tool_result") => {
                        let tool_use_id = p.get("tool_use_id").and_then(Value::as_str)?.to_string();
                        let content = match p.get("content") {
                            Some(Value::String(s)) => s.clone(),
                            Some(Value::Array(blocks)) => blocks
                                .iter()
                                .filter_map(|b| b.get("text").and_then(Value::as_str))
                                .collect::<Vec<_>>()
                                .join("\n"),
                            _ => String::new(),
                        };
                        let is_error = p.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                        Some(ContentPart::ToolResult { tool_use_id, content, is_error })
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => Content::Text(String::new()),
    }
}

fn parse_openai_tools(body: &Value) -> Vec<ToolDefinition> {
    body.get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    let f = t.get("function")?;
                    Some(ToolDefinition {
                        name: f.get("name").and_then(Value::as_str)?.to_string(),
                        description: f.get("description").and_then(Value::as_str).map(String::from),
                        input_schema: f.get("parameters").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_anthropic_tools(body: &Value) -> Vec<ToolDefinition> {
    body.get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    Some(ToolDefinition {
                        name: t.get("name").and_then(Value::as_str)?.to_string(),
                        description: t.get("description").and_then(Value::as_str).map(String::from),
                        input_schema: t.get("input_schema").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_stop_sequences(body: &Value) -> Vec<String> {
    match body.get("stop").or_else(|| body.get("stop_sequences")) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        _ => Vec::new(),
    }
}

/// Parses an OpenAI Chat Completions request body into the pipeline's
/// normalized representation. System messages are lifted out of `messages`
/// into `system`, matching Anthropic's shape so translation is symmetric.
pub fn from_openai_body(body: &Value) -> Result<NormalizedRequest, AppError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let messages_json = body.get("messages").and_then(Value::as_array).ok_or_else(|| AppError::invalid_request("missing `messages`"))?;

    let mut messages = Vec::new();
    let mut system_parts = Vec::new();
    for m in messages_json {
        let role = parse_role(m.get("role").and_then(Value::as_str));
        let content = parse_openai_content(m.get("content").unwrap_or(&Value::Null));
        if role == Role::System {
            system_parts.push(match &content {
                Content::Text(t) => t.clone(),
                Content::Parts(_) => Message { role, content }.text_content(),
            });
            continue;
        }
        messages.push(Message { role, content });
    }

    let tool_choice = match body.get("tool_choice") {
        Some(Value::String(s)) if s == "auto" => Some(ToolChoice::Auto),
        Some(Value::String(s)) if s == "none" => Some(ToolChoice::None),
        Some(Value::String(s)) if s == "required" => Some(ToolChoice::Required),
        Some(v) => v.pointer("/function/name").and_then(Value::as_str).map(|n| ToolChoice::Named(n.to_string())),
        None => None,
    };

    Ok(NormalizedRequest {
        model,
        messages,
        system: if system_parts.is_empty() { None } else { Some(system_parts.join("\n")) },
        tools: parse_openai_tools(body),
        tool_choice,
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
        temperature: body.get("temperature").and_then(Value::as_f64),
        stop_sequences: parse_stop_sequences(body),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Parses an Anthropic Messages API request body into the normalized form.
pub fn from_anthropic_body(body: &Value) -> Result<NormalizedRequest, AppError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let messages_json = body.get("messages").and_then(Value::as_array).ok_or_else(|| AppError::invalid_request("missing `messages`"))?;

    let messages: Vec<Message> = messages_json
        .iter()
        .map(|m| Message { role: parse_role(m.get("role").and_then(Value::as_str)), content: parse_anthropic_content(m.get("content").unwrap_or(&Value::Null)) })
        .collect();

    let system = match body.get("system") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(blocks)) => {
            let joined = blocks.iter().filter_map(|b| b.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join("\n");
            if joined.is_empty() { None } else { Some(joined) }
        }
        _ => None,
    };

    let tool_choice = match body.get("tool_choice") {
        Some(v) => match v.get("type").and_then(Value::as_str) {
            Some("auto") => Some(ToolChoice::Auto),
            Some("any") => Some(ToolChoice::Required),
            Some("tool") => v.get("name").and_then(Value::as_str).map(|n| ToolChoice::Named(n.to_string())),
            _ => None,
        },
        None => None,
    };

    Ok(NormalizedRequest {
        model,
        messages,
        system,
        tools: parse_anthropic_tools(body),
        tool_choice,
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
        temperature: body.get("temperature").and_then(Value::as_f64),
        stop_sequences: parse_stop_sequences(body),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_concatenates_text_parts() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart::Text { text: "hello".into() },
                ContentPart::ImageUrl { url: "http://x".into() },
                ContentPart::Text { text: "world".into() },
            ]),
        };
        assert_eq!(msg.text_content(), "hello\nworld");
    }

    #[test]
    fn bare_string_content_is_text_content() {
        let msg = Message::text(Role::User, "hi there");
        assert_eq!(msg.text_content(), "hi there");
    }
}

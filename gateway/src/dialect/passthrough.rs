//! OpenAI-compatible passthrough: xAI, Moonshot, and plain OpenAI upstreams
//! speak the same wire shape the client sent, so translation is limited to
//! substituting the resolved model and the stream flag.

use serde_json::Value;

/// Rewrites `body["model"]` and `body["stream"]` in place; everything else
/// forwards verbatim.
pub fn rewrite(mut body: Value, model: &str, stream: bool) -> Value {
    body["model"] = Value::String(model.to_string());
    body["stream"] = Value::Bool(stream);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrite_substitutes_model_and_stream_flag() {
        let body = json!({ "model": "gpt-4o", "messages": [], "stream": false });
        let out = rewrite(body, "grok-beta", true);
        assert_eq!(out["model"], "grok-beta");
        assert_eq!(out["stream"], true);
        assert!(out.get("messages").is_some());
    }
}

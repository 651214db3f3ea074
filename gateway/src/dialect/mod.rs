//! Dialect translation: bidirectional message/tool conversions between the
//! OpenAI-style public surface and each upstream provider's wire shape, plus
//! SSE transcoding back into OpenAI `chat.completion.chunk` events.

pub mod anthropic;
pub mod gemini;
pub mod passthrough;
pub mod types;

//! Wire shape of the upstream "Responses" protocol: the request payload this
//! proxy builds, and the SSE event surface it must parse back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{InputItem, ReasoningConfig, Tool, ToolChoice};

/// The JSON body POSTed to the upstream Responses endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RequestPayload {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    /// Always `Some(false)` on the first attempt; upstream rejects any
    /// other value. The adaptive retry in `upstream` may drop this to
    /// `None` entirely if upstream rejects the parameter's mere presence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    pub stream: bool,
    pub prompt_cache_key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

/// Usage block carried on `response.completed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub id: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub error: ResponseError,
}

/// One output item as carried by `output_item.added`/`.done`. Re-serialises
/// with the same shape it was parsed from, so the native-Responses
/// translator can forward it without a second, hand-maintained wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        phase: Option<String>,
        #[serde(default)]
        content: Vec<Value>,
    },
    FunctionCall {
        id: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<Value>,
    },
    CustomToolCall {
        id: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<String>,
    },
    WebSearchCall {
        id: String,
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl OutputItem {
    pub fn id(&self) -> Option<&str> {
        match self {
            OutputItem::Message { id, .. }
            | OutputItem::FunctionCall { id, .. }
            | OutputItem::CustomToolCall { id, .. }
            | OutputItem::WebSearchCall { id, .. } => Some(id),
            OutputItem::Unknown => None,
        }
    }
}

/// Non-streaming rendering of a completed response, folded from the parsed
/// event sequence when a native-Responses client sets `stream:false`.
#[derive(Debug, Clone, Serialize)]
pub struct NativeResponse {
    pub id: String,
    pub object: &'static str,
    pub model: String,
    pub status: &'static str,
    pub output_text: String,
    pub output: Vec<NativeOutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NativeOutputItem {
    pub r#type: &'static str,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// The upstream SSE event surface. Unrecognised `response.*` event types
/// fall into `Unknown` and are skipped by translators, keeping the proxy
/// forward-compatible. Also re-serialisable, so the native-Responses
/// translator can re-emit what it parsed rather than forwarding raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "response.created")]
    Created { response: ResponseMeta },

    #[serde(rename = "response.completed")]
    Completed { response: ResponseMeta },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { item_id: String, delta: String },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone { item_id: String, text: String },

    #[serde(rename = "response.reasoning_summary_part.added")]
    ReasoningSummaryPartAdded { item_id: String },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta { item_id: String, delta: String },

    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta { item_id: String, delta: String },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        item_id: String,
        delta: String,
        #[serde(default)]
        call_id: Option<String>,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        #[serde(default)]
        arguments: Option<Value>,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        item: Option<OutputItem>,
    },

    #[serde(rename = "response.web_search_call.in_progress")]
    WebSearchCallInProgress { item_id: String },

    #[serde(rename = "response.web_search_call.searching")]
    WebSearchCallSearching { item_id: String },

    #[serde(rename = "response.web_search_call.completed")]
    WebSearchCallCompleted { item_id: String },

    #[serde(rename = "response.failed")]
    Failed { response: FailedResponse },

    #[serde(other)]
    Unknown,
}

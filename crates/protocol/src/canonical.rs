//! The canonical request every route funnels into before talking upstream.
//!
//! `Normaliser` (in `proxy`) is the only thing that constructs these from
//! client bodies; dialect-specific shapes never survive past that point.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which client dialect this request came in as, and therefore which
/// dialect the response must be rendered back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Chat,
    Responses,
    Text,
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// One part of a message's content array.
///
/// Assistant messages may only carry `OutputText`; user messages only
/// `InputText`/`InputImage`. Normalisation enforces this while decoding
/// ambiguous string content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

/// One ordered element of the conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message { role: Role, content: Vec<ContentPart> },
    FunctionCall { name: String, arguments: String, call_id: String },
    FunctionCallOutput { call_id: String, output: String },
    CustomToolCall { name: String, call_id: String, input: String },
}

impl InputItem {
    /// The call id this item is keyed by, if it has one.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            InputItem::FunctionCall { call_id, .. } => Some(call_id),
            InputItem::FunctionCallOutput { call_id, .. } => Some(call_id),
            InputItem::CustomToolCall { call_id, .. } => Some(call_id),
            InputItem::Message { .. } => None,
        }
    }

    pub fn is_function_call(&self) -> bool {
        matches!(self, InputItem::FunctionCall { .. })
    }

    pub fn is_function_call_output(&self) -> bool {
        matches!(self, InputItem::FunctionCallOutput { .. })
    }
}

/// A normalised tool definition. `kind` distinguishes the three accepted
/// shapes after they have all been folded into one schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: Value,
    #[serde(default)]
    pub strict: bool,
    pub kind: ToolKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    Custom { format: Option<Value> },
    WebSearch { variant: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub effort: ReasoningEffort,
    pub summary: ReasoningSummary,
}

/// One of three strategies for projecting reasoning summary output into a
/// dialect with no first-class representation for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningCompat {
    ThinkTags,
    O3,
    Legacy,
}

/// The single internal request shape every route funnels into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub response_format: ResponseFormat,
    pub model: String,
    pub requested_model: String,
    pub stream: bool,
    pub include_usage: bool,

    pub input_items: Vec<InputItem>,
    pub instructions: String,

    pub tools: Vec<Tool>,
    pub base_tools: Vec<Tool>,
    pub had_extra_tools: bool,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,

    pub previous_response_id: Option<String>,
    pub conversation_id: Option<String>,
    pub auto_previous_response_id: bool,

    pub reasoning: ReasoningConfig,

    pub store_requested: bool,
    pub store_for_upstream: bool,
    pub include: Vec<String>,

    /// Client-supplied session identifier, if any; short-circuits
    /// fingerprinting.
    pub session_id: Option<String>,
}

impl CanonicalRequest {
    /// The first user message's content, used as the fingerprinting seed
    /// and as a fallback instructions source.
    pub fn first_user_message(&self) -> Option<&[ContentPart]> {
        first_user_message(&self.input_items)
    }
}

/// Standalone version of [`CanonicalRequest::first_user_message`] for
/// callers that only have a bare item list, such as the native-Responses
/// passthrough path which never builds a full `CanonicalRequest` before
/// fingerprinting.
pub fn first_user_message(items: &[InputItem]) -> Option<&[ContentPart]> {
    items.iter().find_map(|item| match item {
        InputItem::Message { role: Role::User, content } => Some(content.as_slice()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_item_round_trips_through_json_for_each_variant() {
        let items = vec![
            InputItem::Message {
                role: Role::User,
                content: vec![ContentPart::InputText { text: "hi".into() }],
            },
            InputItem::FunctionCall {
                name: "read".into(),
                arguments: "{\"p\":\"R\"}".into(),
                call_id: "c1".into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "c1".into(),
                output: "ok".into(),
            },
            InputItem::CustomToolCall {
                name: "shell".into(),
                call_id: "c2".into(),
                input: "ls -la".into(),
            },
        ];

        for item in items {
            let json = serde_json::to_value(&item).unwrap();
            let decoded: InputItem = serde_json::from_value(json.clone()).unwrap();
            let rejson = serde_json::to_value(&decoded).unwrap();
            assert_eq!(json, rejson);
        }
    }

    #[test]
    fn call_id_is_none_for_messages() {
        let item = InputItem::Message {
            role: Role::Assistant,
            content: vec![ContentPart::OutputText { text: "hi".into() }],
        };
        assert_eq!(item.call_id(), None);
    }
}

//! Decodes the three client dialects' request shapes into one
//! `CanonicalRequest`.

use std::sync::Arc;

use protocol::anthropic::{AnthropicMessage, MessagesRequest};
use protocol::canonical::{ContentPart, InputItem, ReasoningConfig, ReasoningEffort, ReasoningSummary, ResponseFormat, Role, Tool, ToolChoice, ToolKind};
use protocol::ollama::ChatRequest as OllamaChatRequest;
use protocol::openai::{ChatCompletionRequest, ChatMessage as OpenAiChatMessage};
use protocol::CanonicalRequest;
use serde_json::Value;
use state::StateStore;

use crate::error::ProxyError;
use crate::polyfill;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Chat,
    Responses,
    Completions,
    AnthropicMessages,
    OllamaChat,
}

pub struct Normaliser {
    state: Arc<StateStore>,
    config: config::Config,
}

impl Normaliser {
    pub fn new(state: Arc<StateStore>, config: config::Config) -> Self {
        Self { state, config }
    }

    pub async fn normalise_openai(&self, route: Route, body: ChatCompletionRequest) -> Result<CanonicalRequest, ProxyError> {
        let response_format = response_format_for_openai(route, &body);

        let mut items = decode_openai_input(route, &body)?;

        let (base_tools, had_extra_tools) = decode_openai_tools(&body, self.config.enable_web_search)?;
        let tools = base_tools.clone();

        let tool_choice = decode_tool_choice(body.tool_choice.as_ref());

        let (folded_items, system_instructions) = fold_system_messages(std::mem::take(&mut items));
        items = folded_items;

        let mut instructions = system_instructions;
        if let Some(explicit) = &body.instructions {
            instructions = join_instructions(instructions, explicit.clone());
        }

        let requested_model = body.model.clone();
        let model = self.effective_model(&requested_model);
        let (effort, summary) = self.resolve_reasoning(&model, body.reasoning.as_ref());

        let explicit_previous = body.previous_response_id.clone();
        let conversation_id = body.conversation_id.clone().or_else(|| body.conversation_id_camel.clone());

        let (previous_response_id, auto_previous) = self.resolve_previous_response(explicit_previous, conversation_id.clone()).await?;

        let outcome = polyfill::apply(&self.state, items, previous_response_id.as_deref(), auto_previous).await?;

        if instructions.trim().is_empty() {
            instructions = outcome.inherited_instructions.clone().unwrap_or_else(|| config::default_system_prompt(&model).to_string());
        }

        if body.store == Some(true) {
            log::warn!("client requested store=true; upstream only accepts false, overriding");
        }

        Ok(CanonicalRequest {
            response_format,
            requested_model,
            model,
            stream: body.stream.unwrap_or(false),
            include_usage: body.stream_options.map(|o| o.include_usage).unwrap_or(false),
            input_items: outcome.input_items,
            instructions,
            tools,
            base_tools,
            had_extra_tools,
            tool_choice,
            parallel_tool_calls: body.parallel_tool_calls.unwrap_or(true),
            previous_response_id,
            conversation_id,
            auto_previous_response_id: auto_previous,
            reasoning: ReasoningConfig { effort, summary },
            store_requested: body.store.unwrap_or(false),
            store_for_upstream: false,
            include: Vec::new(),
            session_id: None,
        })
    }

    pub async fn normalise_anthropic(&self, body: MessagesRequest) -> Result<CanonicalRequest, ProxyError> {
        let mut items = Vec::with_capacity(body.messages.len());
        for message in &body.messages {
            items.push(decode_anthropic_message(message)?);
        }

        let mut instructions = match &body.system {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        };

        let base_tools = decode_generic_tools(body.tools.as_deref().unwrap_or_default(), self.config.enable_web_search)?;
        let tools = base_tools.clone();
        let had_extra_tools = false;
        let tool_choice = decode_tool_choice(body.tool_choice.as_ref());

        let requested_model = body.model.clone();
        let model = self.effective_model(&requested_model);
        let (effort, summary) = self.resolve_reasoning(&model, None);

        let outcome = polyfill::apply(&self.state, items, None, false).await?;
        items = outcome.input_items;

        if instructions.trim().is_empty() {
            instructions = config::default_system_prompt(&model).to_string();
        }

        Ok(CanonicalRequest {
            response_format: ResponseFormat::Anthropic,
            requested_model,
            model,
            stream: body.stream.unwrap_or(false),
            include_usage: true,
            input_items: items,
            instructions,
            tools,
            base_tools,
            had_extra_tools,
            tool_choice,
            parallel_tool_calls: true,
            previous_response_id: None,
            conversation_id: None,
            auto_previous_response_id: false,
            reasoning: ReasoningConfig { effort, summary },
            store_requested: false,
            store_for_upstream: false,
            include: Vec::new(),
            session_id: None,
        })
    }

    pub async fn normalise_ollama(&self, body: OllamaChatRequest) -> Result<CanonicalRequest, ProxyError> {
        let mut items = Vec::with_capacity(body.messages.len());
        for message in &body.messages {
            items.push(decode_ollama_message(message)?);
        }

        let (items, instructions_from_system) = fold_system_messages(items);

        let base_tools = decode_generic_tools(body.tools.as_deref().unwrap_or_default(), self.config.enable_web_search)?;
        let tools = base_tools.clone();
        let had_extra_tools = false;

        let requested_model = body.model.clone();
        let model = self.effective_model(&requested_model);
        let (effort, summary) = self.resolve_reasoning(&model, None);

        let mut instructions = instructions_from_system;
        if instructions.trim().is_empty() {
            instructions = config::default_system_prompt(&model).to_string();
        }

        Ok(CanonicalRequest {
            response_format: ResponseFormat::Ollama,
            requested_model,
            model,
            stream: body.stream.unwrap_or(true),
            include_usage: false,
            input_items: items,
            instructions,
            tools,
            base_tools,
            had_extra_tools,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            previous_response_id: None,
            conversation_id: None,
            auto_previous_response_id: false,
            reasoning: ReasoningConfig { effort, summary },
            store_requested: false,
            store_for_upstream: false,
            include: Vec::new(),
            session_id: None,
        })
    }

    /// Overrides the model used for family-based lookups (baked-in system
    /// prompt, permitted reasoning efforts) when `debug_model` is set,
    /// leaving the client-visible `requested_model` untouched.
    pub(crate) fn effective_model(&self, requested_model: &str) -> String {
        self.config.debug_model.clone().unwrap_or_else(|| requested_model.to_string())
    }

    /// Resolves previous-response/conversation context and splices in any
    /// orphaned function-call output, the same machinery the typed dialects
    /// use, for the native-Responses passthrough path in `routes::chat`.
    pub(crate) async fn resolve_context(
        &self,
        items: Vec<InputItem>,
        previous_response_id: Option<String>,
        conversation_id: Option<String>,
    ) -> Result<(Vec<InputItem>, Option<String>, bool, Option<String>), ProxyError> {
        let (previous_response_id, auto_previous) = self.resolve_previous_response(previous_response_id, conversation_id).await?;
        let outcome = polyfill::apply(&self.state, items, previous_response_id.as_deref(), auto_previous).await?;
        Ok((outcome.input_items, previous_response_id, auto_previous, outcome.inherited_instructions))
    }

    pub(crate) fn resolve_reasoning(&self, model: &str, client_override: Option<&Value>) -> (ReasoningEffort, ReasoningSummary) {
        let mut effort = self.config.default_reasoning_effort;
        let mut summary = self.config.default_reasoning_summary;

        if let Some(value) = client_override {
            if let Some(e) = value.get("effort").and_then(Value::as_str) {
                if let Some(parsed) = parse_effort(e) {
                    effort = parsed;
                }
            }
            if let Some(s) = value.get("summary").and_then(Value::as_str) {
                if let Some(parsed) = parse_summary(s) {
                    summary = parsed;
                }
            }
        }

        let (base_model, suffix_effort) = config::split_effort_suffix(model);
        if let Some(parsed) = suffix_effort {
            effort = parsed;
        }

        let family = config::model_info(base_model).map(|m| m.family).unwrap_or(base_model);
        let permitted = config::permitted_efforts(family);
        if !permitted.contains(&effort) {
            effort = *permitted.first().unwrap_or(&ReasoningEffort::Medium);
        }

        (effort, summary)
    }

    async fn resolve_previous_response(&self, explicit: Option<String>, conversation_id: Option<String>) -> Result<(Option<String>, bool), ProxyError> {
        if let Some(id) = explicit {
            return Ok((Some(id), false));
        }

        if let Some(conversation_id) = conversation_id {
            let resolved = self.state.latest_response_for_conversation(&conversation_id).await;
            return Ok((resolved, true));
        }

        Ok((None, false))
    }
}

fn response_format_for_openai(route: Route, body: &ChatCompletionRequest) -> ResponseFormat {
    if route == Route::Completions {
        return ResponseFormat::Text;
    }

    let has_input = body.input.is_some();
    let has_messages = body.messages.is_some();

    match (has_input, has_messages) {
        (true, false) => ResponseFormat::Responses,
        (false, true) => ResponseFormat::Chat,
        (true, true) => {
            if route == Route::Responses {
                ResponseFormat::Responses
            } else {
                ResponseFormat::Chat
            }
        }
        (false, false) => {
            if route == Route::Responses {
                ResponseFormat::Responses
            } else {
                ResponseFormat::Chat
            }
        }
    }
}

/// Chat route prefers `messages`, responses route prefers `input`; both
/// fall back to `prompt`. An `input` value that doesn't decode as a valid
/// item list is treated as absent rather than an error, so precedence can
/// fall through to the next source.
fn decode_openai_input(route: Route, body: &ChatCompletionRequest) -> Result<Vec<InputItem>, ProxyError> {
    let valid_input = body.input.as_ref().and_then(|v| serde_json::from_value::<Vec<InputItem>>(v.clone()).ok());

    let sources: [Option<Vec<InputItem>>; 3] = match route {
        Route::Responses => [valid_input, body.messages.as_ref().map(|m| decode_openai_messages(m)).transpose()?, body.prompt.as_ref().map(decode_prompt)],
        _ => [
            body.messages.as_ref().map(|m| decode_openai_messages(m)).transpose()?,
            valid_input,
            body.prompt.as_ref().map(decode_prompt),
        ],
    };

    for source in sources {
        if let Some(items) = source {
            return Ok(items);
        }
    }

    Ok(Vec::new())
}

fn decode_prompt(value: &Value) -> Vec<InputItem> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    vec![InputItem::Message {
        role: Role::User,
        content: vec![ContentPart::InputText { text }],
    }]
}

fn decode_openai_messages(messages: &[OpenAiChatMessage]) -> Result<Vec<InputItem>, ProxyError> {
    let mut items = Vec::with_capacity(messages.len());

    for message in messages {
        let role = parse_role(&message.role)?;

        if role == Role::Assistant {
            if let Some(tool_calls) = &message.tool_calls {
                let has_text = message.content.as_ref().map(|c| !content_is_empty(c)).unwrap_or(false);
                if has_text {
                    items.push(InputItem::Message {
                        role,
                        content: content_parts_from_value(message.content.as_ref().unwrap(), role)?,
                    });
                }
                for call in tool_calls {
                    items.push(InputItem::FunctionCall {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                        call_id: call.id.clone(),
                    });
                }
                continue;
            }
        }

        if message.role == "tool" {
            let call_id = message.tool_call_id.clone().ok_or_else(|| ProxyError::BadRequest("tool message missing tool_call_id".to_string()))?;
            let output = match &message.content {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            items.push(InputItem::FunctionCallOutput { call_id, output });
            continue;
        }

        let content = message.content.clone().unwrap_or(Value::String(String::new()));
        items.push(InputItem::Message {
            role,
            content: content_parts_from_value(&content, role)?,
        });
    }

    Ok(items)
}

fn content_is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn parse_role(role: &str) -> Result<Role, ProxyError> {
    match role {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        "developer" => Ok(Role::Developer),
        "tool" => Ok(Role::User),
        other => Err(ProxyError::BadRequest(format!("unsupported message role '{other}'"))),
    }
}

/// Assistant messages may only carry `output_text`; user/system messages
/// only `input_text`/`input_image`.
fn content_parts_from_value(value: &Value, role: Role) -> Result<Vec<ContentPart>, ProxyError> {
    match value {
        Value::String(text) => Ok(vec![text_part(role, text.clone())]),
        Value::Array(parts) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                if let Some(decoded) = decode_content_part(part, role) {
                    out.push(decoded);
                }
            }
            Ok(out)
        }
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![text_part(role, other.to_string())]),
    }
}

fn text_part(role: Role, text: String) -> ContentPart {
    if role == Role::Assistant {
        ContentPart::OutputText { text }
    } else {
        ContentPart::InputText { text }
    }
}

fn decode_content_part(part: &Value, role: Role) -> Option<ContentPart> {
    let kind = part.get("type").and_then(Value::as_str)?;

    match kind {
        "text" | "input_text" | "output_text" => part.get("text").and_then(Value::as_str).map(|t| text_part(role, t.to_string())),
        "image_url" => {
            let url = part.get("image_url").and_then(|v| v.get("url").or(Some(v))).and_then(Value::as_str)?;
            Some(ContentPart::InputImage { image_url: url.to_string() })
        }
        "input_image" => part.get("image_url").and_then(Value::as_str).map(|url| ContentPart::InputImage { image_url: url.to_string() }),
        _ => None,
    }
}

fn decode_anthropic_message(message: &AnthropicMessage) -> Result<InputItem, ProxyError> {
    let role = parse_role(&message.role)?;

    // tool_result content blocks decode to function_call_output; everything
    // else folds into a plain message.
    if let Value::Array(parts) = &message.content {
        if let Some(result) = parts.iter().find(|p| p.get("type").and_then(Value::as_str) == Some("tool_result")) {
            let call_id = result.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let output = match result.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return Ok(InputItem::FunctionCallOutput { call_id, output });
        }

        if let Some(tool_use) = parts.iter().find(|p| p.get("type").and_then(Value::as_str) == Some("tool_use")) {
            let call_id = tool_use.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let name = tool_use.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = tool_use.get("input").cloned().unwrap_or(Value::Object(Default::default())).to_string();
            return Ok(InputItem::FunctionCall { name, arguments, call_id });
        }
    }

    Ok(InputItem::Message {
        role,
        content: content_parts_from_value(&message.content, role)?,
    })
}

fn decode_ollama_message(message: &protocol::ollama::ChatMessage) -> Result<InputItem, ProxyError> {
    let role = parse_role(&message.role)?;
    let text = message.content.clone().unwrap_or_default();

    Ok(InputItem::Message {
        role,
        content: vec![text_part(role, text)],
    })
}

fn fold_system_messages(items: Vec<InputItem>) -> (Vec<InputItem>, String) {
    let mut system_texts = Vec::new();
    let mut rest = Vec::with_capacity(items.len());

    for item in items {
        match &item {
            InputItem::Message { role: Role::System | Role::Developer, content } => {
                let text = content
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::InputText { text } | ContentPart::OutputText { text } => Some(text.clone()),
                        ContentPart::InputImage { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            _ => rest.push(item),
        }
    }

    (rest, system_texts.join("\n"))
}

fn join_instructions(folded: String, client_provided: String) -> String {
    match (folded.is_empty(), client_provided.is_empty()) {
        (true, _) => client_provided,
        (false, true) => folded,
        (false, false) => format!("{folded}\n{client_provided}"),
    }
}

/// Unifies the three accepted tool shapes. Returns
/// `(base_tools, had_extra_tools)`, where `had_extra_tools` is set when an
/// additive `responses_tools` list (web-search-only) was also present.
fn decode_openai_tools(body: &ChatCompletionRequest, enable_web_search: bool) -> Result<(Vec<Tool>, bool), ProxyError> {
    let mut tools = decode_generic_tools(body.tools.as_deref().unwrap_or_default(), enable_web_search)?;

    let mut had_extra = false;
    if let Some(extra) = &body.responses_tools {
        if !extra.is_empty() && !enable_web_search {
            return Err(ProxyError::BadRequest("web search is not enabled on this server".to_string()));
        }
        had_extra = !extra.is_empty();
        for entry in extra {
            let kind = entry.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind != "web_search" && kind != "web_search_preview" {
                return Err(ProxyError::BadRequest(format!("responses_tools entries must be a web-search variant, got '{kind}'")));
            }
            tools.push(Tool {
                name: kind.to_string(),
                description: None,
                parameters: Value::Object(Default::default()),
                strict: false,
                kind: ToolKind::WebSearch { variant: kind.to_string() },
            });
        }
    }

    Ok((tools, had_extra))
}

fn decode_generic_tools(tools: &[Value], enable_web_search: bool) -> Result<Vec<Tool>, ProxyError> {
    let mut out = Vec::with_capacity(tools.len());

    for value in tools {
        if let Some(tool) = decode_tool(value, enable_web_search) {
            if !tool.name.is_empty() {
                out.push(tool);
            }
        }
    }

    Ok(out)
}

fn decode_tool(value: &Value, enable_web_search: bool) -> Option<Tool> {
    let kind = value.get("type").and_then(Value::as_str)?;

    match kind {
        "function" => {
            // Chat-style nests the definition under `function`; Responses
            // style has it inline.
            let def = value.get("function").unwrap_or(value);
            let name = def.get("name").and_then(Value::as_str)?.to_string();
            let description = def.get("description").and_then(Value::as_str).map(str::to_string);
            let parameters = def.get("parameters").cloned().unwrap_or_else(default_parameters);
            let strict = def.get("strict").and_then(Value::as_bool).unwrap_or(false);

            Some(Tool {
                name,
                description,
                parameters,
                strict,
                kind: ToolKind::Function,
            })
        }
        "custom" => {
            let name = value.get("name").and_then(Value::as_str)?.to_string();
            let format = value.get("format").cloned();
            Some(Tool {
                name,
                description: value.get("description").and_then(Value::as_str).map(str::to_string),
                parameters: default_parameters(),
                strict: false,
                kind: ToolKind::Custom { format },
            })
        }
        "web_search" | "web_search_preview" if enable_web_search => Some(Tool {
            name: kind.to_string(),
            description: None,
            parameters: default_parameters(),
            strict: false,
            kind: ToolKind::WebSearch { variant: kind.to_string() },
        }),
        "web_search" | "web_search_preview" => None,
        _ => None,
    }
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn decode_tool_choice(value: Option<&Value>) -> ToolChoice {
    match value {
        Some(Value::String(s)) if s == "auto" => ToolChoice::Auto,
        Some(Value::String(s)) if s == "none" => ToolChoice::None,
        Some(Value::String(s)) if s == "required" => ToolChoice::Required,
        Some(Value::Object(_)) => value
            .and_then(|v| v.get("function"))
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Function { name: name.to_string() })
            .unwrap_or(ToolChoice::Auto),
        _ => ToolChoice::Auto,
    }
}

fn parse_effort(s: &str) -> Option<ReasoningEffort> {
    match s {
        "minimal" => Some(ReasoningEffort::Minimal),
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        "xhigh" => Some(ReasoningEffort::Xhigh),
        _ => None,
    }
}

fn parse_summary(s: &str) -> Option<ReasoningSummary> {
    match s {
        "auto" => Some(ReasoningSummary::Auto),
        "concise" => Some(ReasoningSummary::Concise),
        "detailed" => Some(ReasoningSummary::Detailed),
        "none" => Some(ReasoningSummary::None),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config() -> config::Config {
        config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            access_token: None,
            default_reasoning_effort: ReasoningEffort::Medium,
            default_reasoning_summary: ReasoningSummary::Auto,
            reasoning_compat: protocol::ReasoningCompat::ThinkTags,
            debug_model: None,
            expose_reasoning_models: false,
            enable_web_search: false,
        }
    }

    fn normaliser() -> Normaliser {
        Normaliser::new(Arc::new(StateStore::new(100, Duration::from_secs(60))), test_config())
    }

    #[tokio::test]
    async fn simple_chat_message_normalises_to_a_single_user_item() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "Hello!"}],
            "stream": false,
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();

        assert_eq!(request.response_format, ResponseFormat::Chat);
        assert_eq!(request.input_items.len(), 1);
        assert!(matches!(&request.input_items[0], InputItem::Message { role: Role::User, .. }));
    }

    #[tokio::test]
    async fn input_field_on_chat_route_overrides_response_format() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "input": [{"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]}],
            "stream": true,
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();
        assert_eq!(request.response_format, ResponseFormat::Responses);
    }

    #[tokio::test]
    async fn system_message_folds_into_instructions() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
            ],
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();
        assert_eq!(request.instructions, "be terse");
        assert_eq!(request.input_items.len(), 1);
    }

    #[tokio::test]
    async fn empty_tool_name_is_dropped() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "", "parameters": {}}}],
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn invalid_responses_tools_entry_is_a_400() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "responses_tools": [{"type": "code_interpreter"}],
        }))
        .unwrap();

        let err = normaliser().normalise_openai(Route::Chat, body).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reasoning_effort_suffix_overrides_default() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5-high",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();
        assert_eq!(request.reasoning.effort, ReasoningEffort::High);
    }

    #[tokio::test]
    async fn web_search_tool_is_dropped_when_disabled() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "web_search"}],
        }))
        .unwrap();

        let request = normaliser().normalise_openai(Route::Chat, body).await.unwrap();
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn web_search_tool_is_kept_when_enabled() {
        let mut config = test_config();
        config.enable_web_search = true;
        let normaliser = Normaliser::new(Arc::new(StateStore::new(100, Duration::from_secs(60))), config);

        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "web_search"}],
        }))
        .unwrap();

        let request = normaliser.normalise_openai(Route::Chat, body).await.unwrap();
        assert_eq!(request.tools.len(), 1);
    }

    #[tokio::test]
    async fn responses_tools_is_rejected_when_web_search_disabled() {
        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "responses_tools": [{"type": "web_search"}],
        }))
        .unwrap();

        let err = normaliser().normalise_openai(Route::Chat, body).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn debug_model_overrides_family_lookup_but_not_requested_model() {
        let mut config = test_config();
        config.debug_model = Some("codex-mini".to_string());
        let normaliser = Normaliser::new(Arc::new(StateStore::new(100, Duration::from_secs(60))), config);

        let body: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "some-unlisted-model",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();

        let request = normaliser.normalise_openai(Route::Chat, body).await.unwrap();
        assert_eq!(request.requested_model, "some-unlisted-model");
        assert_eq!(request.instructions, config::default_system_prompt("codex-mini"));
    }
}

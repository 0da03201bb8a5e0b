//! Converts the single upstream event stream into each client dialect's
//! framing, and captures enough of it to answer a future turn's
//! previous-response polyfill.

mod anthropic;
mod chat;
mod ollama;
mod responses;

pub use anthropic::{respond as respond_anthropic, Frame as AnthropicFrame};
pub use chat::{respond as respond_chat, Frame as ChatFrame};
pub use ollama::{respond as respond_ollama, Frame as OllamaFrame};
pub use responses::{respond as respond_responses, Frame as ResponsesFrame};

use std::sync::Arc;

use indexmap::IndexMap;
use protocol::{CanonicalRequest, InputItem};
use state::{CallRecord, StateStore, StoredResponseSnapshot};

/// Accumulates what a turn needs recorded regardless of which dialect is
/// rendering it back to the client. `calls` preserves emission order so a
/// later turn's context reconstructs the same call ordering upstream used.
#[derive(Debug, Default)]
pub(crate) struct Capture {
    pub calls: IndexMap<String, CallRecord>,
    pub response_id: Option<String>,
}

impl Capture {
    pub fn record_call(&mut self, call_id: String, name: String, arguments: String) {
        self.calls.insert(call_id, CallRecord { name, arguments });
    }
}

/// Writes the snapshot once `response.completed` is observed. No-op if the
/// upstream never sent an id (e.g. it failed before `response.created`).
pub(crate) async fn finish(state: &Arc<StateStore>, request: &CanonicalRequest, capture: Capture) {
    let Some(ref response_id) = capture.response_id else {
        return;
    };

    let context = effective_context(request, &capture);

    state
        .put_response(
            response_id,
            StoredResponseSnapshot {
                calls: capture.calls.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                context,
                instructions: request.instructions.clone(),
            },
        )
        .await;

    if let Some(conversation_id) = &request.conversation_id {
        state.put_conversation(conversation_id, response_id).await;
    }
}

/// The context a future turn should prepend: this turn's input items plus
/// the function calls it produced, in call order, so a later
/// `function_call_output` can be spliced against them without a second
/// round trip to the model.
fn effective_context(request: &CanonicalRequest, capture: &Capture) -> Vec<InputItem> {
    let mut context = request.input_items.clone();

    for (call_id, record) in &capture.calls {
        context.push(InputItem::FunctionCall {
            name: record.name.clone(),
            arguments: record.arguments.clone(),
            call_id: call_id.clone(),
        });
    }

    context
}

pub(crate) fn web_search_tool_name() -> &'static str {
    "web_search"
}

//! Reconstructs the multi-turn context upstream does not persist itself.
//! Runs after the normaliser has decoded input items but before the
//! request is handed to `UpstreamClient`.

use std::collections::HashSet;

use protocol::InputItem;
use state::{StateStore, StoredResponseSnapshot};

use crate::error::ProxyError;

#[derive(Debug)]
pub struct PolyfillOutcome {
    pub input_items: Vec<InputItem>,
    /// Instructions carried by the referenced snapshot, used when the
    /// current turn didn't supply its own.
    pub inherited_instructions: Option<String>,
}

/// `previous_response_id` is `None` when there was nothing to resolve.
/// `auto` is `true` when it came from the conversation-id mapping rather
/// than an explicit client-supplied value; that changes failure handling.
pub async fn apply(state: &StateStore, input_items: Vec<InputItem>, previous_response_id: Option<&str>, auto: bool) -> Result<PolyfillOutcome, ProxyError> {
    let Some(response_id) = previous_response_id else {
        ensure_no_orphans(&input_items)?;
        return Ok(PolyfillOutcome {
            input_items,
            inherited_instructions: None,
        });
    };

    let Some(snapshot) = state.get_response(response_id).await else {
        if auto {
            ensure_no_orphans(&input_items)?;
            return Ok(PolyfillOutcome {
                input_items,
                inherited_instructions: None,
            });
        }

        let unresolved = unresolved_call_ids(&input_items);
        let mut message = format!("unknown or expired previous_response_id '{response_id}'");
        if !unresolved.is_empty() {
            message.push_str(&format!("; unresolved function_call_output callID(s) {}: send previous_response_id or include the matching function_call items inline", unresolved.join(", ")));
        }
        return Err(ProxyError::BadRequest(message));
    };

    let mut items = input_items;
    if !items.starts_with(snapshot.context.as_slice()) {
        let mut combined = snapshot.context.clone();
        combined.extend(items);
        items = combined;
    }

    let items = splice_orphan_calls(items, &snapshot)?;

    Ok(PolyfillOutcome {
        input_items: items,
        inherited_instructions: Some(snapshot.instructions.clone()),
    })
}

fn splice_orphan_calls(items: Vec<InputItem>, snapshot: &StoredResponseSnapshot) -> Result<Vec<InputItem>, ProxyError> {
    let mut seen_calls = HashSet::new();
    let mut result = Vec::with_capacity(items.len());
    let mut unresolved = Vec::new();

    for item in items {
        if item.is_function_call() {
            if let Some(id) = item.call_id() {
                seen_calls.insert(id.to_string());
            }
            result.push(item);
            continue;
        }

        if item.is_function_call_output() {
            let call_id = item.call_id().expect("function_call_output always has a call id").to_string();

            if !seen_calls.contains(&call_id) {
                match snapshot.calls.get(&call_id) {
                    Some(record) => {
                        result.push(InputItem::FunctionCall {
                            name: record.name.clone(),
                            arguments: record.arguments.clone(),
                            call_id: call_id.clone(),
                        });
                        seen_calls.insert(call_id.clone());
                    }
                    None => unresolved.push(call_id.clone()),
                }
            }

            result.push(item);
            continue;
        }

        result.push(item);
    }

    if !unresolved.is_empty() {
        return Err(ProxyError::BadRequest(format!(
            "unresolved function_call_output callID(s) {}: send previous_response_id or include the matching function_call items inline",
            unresolved.join(", ")
        )));
    }

    Ok(result)
}

fn ensure_no_orphans(items: &[InputItem]) -> Result<(), ProxyError> {
    let unresolved = unresolved_call_ids(items);
    if unresolved.is_empty() {
        return Ok(());
    }

    Err(ProxyError::BadRequest(format!(
        "unresolved function_call_output callID(s) {}: send previous_response_id or include the matching function_call items inline",
        unresolved.join(", ")
    )))
}

fn unresolved_call_ids(items: &[InputItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unresolved = Vec::new();

    for item in items {
        if item.is_function_call() {
            if let Some(id) = item.call_id() {
                seen.insert(id.to_string());
            }
        } else if item.is_function_call_output() {
            let id = item.call_id().expect("function_call_output always has a call id").to_string();
            if !seen.contains(&id) {
                unresolved.push(id);
            }
        }
    }

    unresolved
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use state::CallRecord;

    use super::*;

    fn function_call(call_id: &str) -> InputItem {
        InputItem::FunctionCall {
            name: "read".to_string(),
            arguments: "{\"p\":\"R\"}".to_string(),
            call_id: call_id.to_string(),
        }
    }

    fn function_call_output(call_id: &str) -> InputItem {
        InputItem::FunctionCallOutput {
            call_id: call_id.to_string(),
            output: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn splices_orphan_function_call_from_stored_snapshot() {
        let store = StateStore::new(10, Duration::from_secs(60));
        let mut calls = HashMap::new();
        calls.insert(
            "c1".to_string(),
            CallRecord {
                name: "read".to_string(),
                arguments: "{\"p\":\"R\"}".to_string(),
            },
        );
        store
            .put_response(
                "resp_1",
                StoredResponseSnapshot {
                    calls,
                    context: Vec::new(),
                    instructions: "be helpful".to_string(),
                },
            )
            .await;

        let outcome = apply(&store, vec![function_call_output("c1")], Some("resp_1"), false).await.unwrap();

        assert_eq!(outcome.input_items, vec![function_call("c1"), function_call_output("c1")]);
        assert_eq!(outcome.inherited_instructions.as_deref(), Some("be helpful"));
    }

    #[tokio::test]
    async fn unknown_previous_response_fails_with_both_ids_named() {
        let store = StateStore::new(10, Duration::from_secs(60));

        let err = apply(&store, vec![function_call_output("c1")], Some("resp_missing"), false).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("resp_missing"));
        assert!(message.contains("c1"));
    }

    #[tokio::test]
    async fn auto_resolved_missing_conversation_is_not_an_error() {
        let store = StateStore::new(10, Duration::from_secs(60));

        let outcome = apply(&store, vec![function_call("c1"), function_call_output("c1")], Some("resp_missing"), true).await.unwrap();

        assert_eq!(outcome.input_items.len(), 2);
    }

    #[tokio::test]
    async fn orphan_without_any_previous_response_is_a_400() {
        let store = StateStore::new(10, Duration::from_secs(60));
        let err = apply(&store, vec![function_call_output("c1")], None, false).await.unwrap_err();
        assert!(err.to_string().contains("c1"));
    }
}

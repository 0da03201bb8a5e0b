//! Reassembles function-call arguments that upstream streams as
//! out-of-order fragments across `output_item.added`,
//! `function_call_arguments.delta`, and `function_call_arguments.done`
//! Owned by a single translator; never shared across requests.

use serde_json::Value;

const ARG_BUFFER_CAP: usize = 1024 * 1024;

#[derive(Default)]
pub struct ToolBuffer {
    item_args: std::collections::HashMap<String, Value>,
    arg_buf: std::collections::HashMap<String, String>,
    item_to_call: std::collections::HashMap<String, String>,
}

impl ToolBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `response.output_item.added` for a function-call item.
    pub fn record_added(&mut self, item_id: &str, call_id: Option<&str>, initial_arguments: Option<&Value>) {
        if let Some(call_id) = call_id {
            if call_id != item_id {
                self.item_to_call.insert(item_id.to_string(), call_id.to_string());
            }
        }

        if let Some(value) = initial_arguments {
            if !is_empty_sentinel_value(value) {
                self.item_args.insert(item_id.to_string(), value.clone());
            }
        }
    }

    /// `response.function_call_arguments.delta`. Mirrors into the call id's
    /// buffer too when the two ids differ, since downstream resolution may
    /// be keyed by either.
    pub fn append_delta(&mut self, item_id: &str, call_id: Option<&str>, delta: &str) {
        append_capped(&mut self.arg_buf, item_id, delta);

        let mapped_call_id = call_id.or_else(|| self.item_to_call.get(item_id).map(String::as_str));
        if let Some(call_id) = mapped_call_id {
            if call_id != item_id {
                append_capped(&mut self.arg_buf, call_id, delta);
            }
        }
    }

    /// `response.function_call_arguments.done`. Prefers the event's own
    /// `arguments`, falling back to its embedded `item`'s arguments when the
    /// provider duplicates them there instead.
    pub fn record_done(&mut self, item_id: &str, call_id: Option<&str>, arguments: Option<&Value>, embedded_item_arguments: Option<&Value>) {
        if let Some(call_id) = call_id {
            if call_id != item_id {
                self.item_to_call.insert(item_id.to_string(), call_id.to_string());
            }
        }

        let resolved = arguments.filter(|v| !is_empty_sentinel_value(v)).or_else(|| embedded_item_arguments.filter(|v| !is_empty_sentinel_value(v)));

        if let Some(value) = resolved {
            self.item_args.insert(item_id.to_string(), value.clone());
        }
    }

    /// Resolution order: a concrete non-empty value under the
    /// item id, call id, or mapped call id; then parsed JSON from the
    /// buffered fragments; then the raw buffered string.
    pub fn resolve_arguments(&self, item_id: &str, call_id: Option<&str>) -> String {
        let mapped_call_id = call_id.or_else(|| self.item_to_call.get(item_id).map(String::as_str));

        for key in [Some(item_id), call_id, mapped_call_id].into_iter().flatten() {
            if let Some(value) = self.item_args.get(key) {
                if !is_empty_sentinel_value(value) {
                    return value_to_argument_string(value);
                }
            }
        }

        for key in [Some(item_id), call_id, mapped_call_id].into_iter().flatten() {
            if let Some(buf) = self.arg_buf.get(key) {
                if is_empty_sentinel_str(buf) {
                    continue;
                }
                if serde_json::from_str::<Value>(buf).is_ok() {
                    return buf.clone();
                }
            }
        }

        for key in [Some(item_id), call_id, mapped_call_id].into_iter().flatten() {
            if let Some(buf) = self.arg_buf.get(key) {
                if !is_empty_sentinel_str(buf) {
                    return buf.clone();
                }
            }
        }

        "{}".to_string()
    }

    pub fn call_id_for(&self, item_id: &str) -> Option<&str> {
        self.item_to_call.get(item_id).map(String::as_str)
    }
}

fn append_capped(buf: &mut std::collections::HashMap<String, String>, key: &str, delta: &str) {
    let entry = buf.entry(key.to_string()).or_default();
    if entry.len() + delta.len() > ARG_BUFFER_CAP {
        log::warn!("tool call argument buffer for {key} exceeded cap, dropping fragment");
        return;
    }
    entry.push_str(delta);
}

fn value_to_argument_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_sentinel_str(s: &str) -> bool {
    matches!(s.trim(), "" | "{}" | "null" | "[]")
}

fn is_empty_sentinel_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => is_empty_sentinel_str(s),
        Value::Object(map) => map.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_interleaved_deltas_for_two_calls() {
        let mut buf = ToolBuffer::new();
        buf.record_added("item_a", Some("call_a"), None);
        buf.record_added("item_b", Some("call_b"), None);

        buf.append_delta("item_a", Some("call_a"), "{\"q\":\"go");
        buf.append_delta("item_b", Some("call_b"), "{\"p\":\"R");
        buf.append_delta("item_a", Some("call_a"), " proxy\"}");
        buf.append_delta("item_b", Some("call_b"), ".md\"}");

        buf.record_done("item_a", Some("call_a"), None, None);
        buf.record_done("item_b", Some("call_b"), None, None);

        assert_eq!(buf.resolve_arguments("item_a", Some("call_a")), "{\"q\":\"go proxy\"}");
        assert_eq!(buf.resolve_arguments("item_b", Some("call_b")), "{\"p\":\"R.md\"}");
    }

    #[test]
    fn delta_before_added_is_still_accounted_for() {
        let mut buf = ToolBuffer::new();
        buf.append_delta("item_shell", None, "{\"cmd\":\"ls\"}");
        buf.record_added("item_shell", Some("call_shell"), None);
        buf.record_done("item_shell", Some("call_shell"), None, None);

        assert_eq!(buf.resolve_arguments("item_shell", Some("call_shell")), "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn non_empty_done_payload_overrides_buffered_fragments() {
        let mut buf = ToolBuffer::new();
        buf.append_delta("item_a", Some("call_a"), "{\"partial");
        buf.record_done("item_a", Some("call_a"), Some(&serde_json::json!({"q": "final"})), None);

        assert_eq!(buf.resolve_arguments("item_a", Some("call_a")), "{\"q\":\"final\"}");
    }

    #[test]
    fn empty_done_sentinel_falls_back_to_buffered_fragments() {
        let mut buf = ToolBuffer::new();
        buf.append_delta("item_a", Some("call_a"), "{\"q\":\"go\"}");
        buf.record_done("item_a", Some("call_a"), Some(&Value::Null), None);

        assert_eq!(buf.resolve_arguments("item_a", Some("call_a")), "{\"q\":\"go\"}");
    }

    #[test]
    fn resolves_with_no_information_to_empty_object() {
        let buf = ToolBuffer::new();
        assert_eq!(buf.resolve_arguments("item_unknown", None), "{}");
    }
}

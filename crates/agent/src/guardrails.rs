use serde_json::{Map, Value};

pub const CLARIFICATION_MESSAGE: &str = "I keep trying the same step without making progress. \
Could you clarify what you would like me to do, or add the missing details?";

pub const STEP_BUDGET_MESSAGE: &str = "That request needs more steps than I can take in one go. \
Please break this into smaller requests.";

/// Canonical form of one tool call, used only to detect repeats within a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallSignature {
    pub tool: String,
    pub args: String,
}

impl ToolCallSignature {
    pub fn new(tool: &str, args: &Value) -> Self {
        Self { tool: tool.to_owned(), args: canonical_json(args) }
    }
}

/// Serializes `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepeatTracker {
    pub last_call_signature: Option<ToolCallSignature>,
    pub repeat_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Halt { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_steps: u32,
    pub repeat_threshold: u32,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_steps: 6, repeat_threshold: 2 }
    }
}

impl GuardrailPolicy {
    pub fn new(max_steps: u32, repeat_threshold: u32) -> Self {
        Self { max_steps: max_steps.max(1), repeat_threshold: repeat_threshold.max(1) }
    }

    /// Checked before each gateway call.
    pub fn check_budget(&self, steps_taken: u32) -> GuardrailDecision {
        if steps_taken < self.max_steps {
            GuardrailDecision::Allow
        } else {
            GuardrailDecision::Halt {
                reason_code: "step_budget_exhausted",
                user_message: STEP_BUDGET_MESSAGE.to_owned(),
            }
        }
    }

    /// Records `signature` and halts once the same call has repeated
    /// `repeat_threshold` times back to back.
    pub fn observe_call(
        &self,
        tracker: &mut RepeatTracker,
        signature: ToolCallSignature,
    ) -> GuardrailDecision {
        if tracker.last_call_signature.as_ref() == Some(&signature) {
            tracker.repeat_count += 1;
        } else {
            tracker.repeat_count = 0;
            tracker.last_call_signature = Some(signature);
        }

        if tracker.repeat_count >= self.repeat_threshold {
            GuardrailDecision::Halt {
                reason_code: "repeated_tool_call",
                user_message: CLARIFICATION_MESSAGE.to_owned(),
            }
        } else {
            GuardrailDecision::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        canonical_json, GuardrailDecision, GuardrailPolicy, RepeatTracker, ToolCallSignature,
    };

    #[test]
    fn signatures_ignore_key_order() {
        let left = ToolCallSignature::new("add_todo", &json!({"title": "a", "meta": {"y": 1, "x": 2}}));
        let right = ToolCallSignature::new("add_todo", &json!({"meta": {"x": 2, "y": 1}, "title": "a"}));
        assert_eq!(left, right);
        assert_eq!(canonical_json(&json!({"b": 1, "a": [{"d": 1, "c": 2}]})), r#"{"a":[{"c":2,"d":1}],"b":1}"#);
    }

    #[test]
    fn third_identical_call_halts() {
        let policy = GuardrailPolicy::default();
        let mut tracker = RepeatTracker::default();
        let call = || ToolCallSignature::new("search_email", &json!({"query": "budget"}));

        assert!(policy.observe_call(&mut tracker, call()).is_allow());
        assert!(policy.observe_call(&mut tracker, call()).is_allow());
        let decision = policy.observe_call(&mut tracker, call());
        assert!(matches!(
            decision,
            GuardrailDecision::Halt { reason_code: "repeated_tool_call", .. }
        ));
    }

    #[test]
    fn different_call_resets_the_counter() {
        let policy = GuardrailPolicy::default();
        let mut tracker = RepeatTracker::default();
        let search = ToolCallSignature::new("search_email", &json!({"query": "budget"}));
        let other = ToolCallSignature::new("search_email", &json!({"query": "invoice"}));

        assert!(policy.observe_call(&mut tracker, search.clone()).is_allow());
        assert!(policy.observe_call(&mut tracker, search.clone()).is_allow());
        assert!(policy.observe_call(&mut tracker, other).is_allow());
        assert_eq!(tracker.repeat_count, 0);
        assert!(policy.observe_call(&mut tracker, search).is_allow());
    }

    #[test]
    fn budget_halts_at_max_steps() {
        let policy = GuardrailPolicy::new(2, 2);
        assert!(policy.check_budget(0).is_allow());
        assert!(policy.check_budget(1).is_allow());
        let decision = policy.check_budget(2);
        let message = match decision {
            GuardrailDecision::Halt { user_message, .. } => user_message,
            GuardrailDecision::Allow => String::new(),
        };
        assert!(message.contains("smaller requests"));
    }
}

use crate::store::Item;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Evaluates every flag in `flags` against a user context, producing the
/// `{flagKey: value}` map returned by the `/sdk/eval/*` endpoints.
///
/// This is intentionally not a targeting-rule engine: rule evaluation
/// (user targeting, percentage rollouts, prerequisites) is the job of the
/// client-side SDK that normally talks to the full flags service, and is
/// out of scope here. Each flag's opaque payload is expected to carry a
/// flat `value` — whatever the upstream service already resolved it to —
/// and that value is returned as-is, independent of the user context.
pub fn evaluate_all(flags: &HashMap<String, Item>) -> Value {
    let mut result = Map::with_capacity(flags.len());
    for (key, item) in flags {
        let value = item.value.get("value").cloned().unwrap_or(Value::Null);
        result.insert(key.clone(), value);
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value, version: u64) -> Item {
        Item {
            key: "flag".to_string(),
            version,
            deleted: false,
            value: json!({"value": value}),
        }
    }

    #[test]
    fn extracts_bare_values_by_key() {
        let mut flags = HashMap::new();
        flags.insert("a".to_string(), item(json!(true), 1));
        let result = evaluate_all(&flags);
        assert_eq!(result["a"], json!(true));
    }

    #[test]
    fn empty_store_yields_empty_object() {
        let flags = HashMap::new();
        assert_eq!(evaluate_all(&flags), Value::Object(Map::new()));
    }
}

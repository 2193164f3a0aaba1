// crates/wmag-registry/src/merge.rs
// ============================================================================
// Module: Layered Merge
// Description: Deep-merges base -> org -> tenant -> user registry documents,
// expressed as serde_json::Value so the merge logic stays independent of the
// typed RegistryDocument shape.
// Invariants:
//   - List sections (tools/actions/roles/policies/retry_classes) are merged
//     by id into a BTreeMap, giving deterministic iteration order regardless
//     of the source documents' array order.
//   - Scalar/object fields use later-layer-wins recursive merge.
//   - A missing layer is treated as an empty document, not an error.
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;

/// Field names treated as the identifying key when merging an array section
/// by id. Checked in order; the first one present on an element is used.
const ID_FIELDS: &[&str] = &["tool_id", "action_id", "role_id", "policy_id", "class"];

/// Deep-merges `overlay` onto `base`, returning the merged document.
/// Neither input is mutated.
#[must_use]
pub fn merge_documents(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged_value = match merged.get(key) {
                    Some(base_value) => merge_field(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        // Non-object overlay replaces base outright; objects only merge
        // with objects.
        (_, overlay_value) => overlay_value.clone(),
    }
}

fn merge_field(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            merge_array_by_id(base_items, overlay_items)
        }
        (Value::Object(_), Value::Object(_)) => merge_documents(base, overlay),
        (_, overlay_value) => overlay_value.clone(),
    }
}

fn array_id_field(items: &[Value]) -> Option<&'static str> {
    items.iter().find_map(|item| {
        let obj = item.as_object()?;
        ID_FIELDS.iter().copied().find(|field| obj.contains_key(*field))
    })
}

fn item_id(item: &Value, field: &str) -> Option<String> {
    item.as_object()?.get(field)?.as_str().map(str::to_string)
}

/// Merges two arrays of objects by their identifying field, later entries
/// winning field-by-field over earlier entries with the same id. Falls back
/// to outright replacement (`overlay_items`) when no recognized id field is
/// present, since there is nothing stable to merge by.
fn merge_array_by_id(base_items: &[Value], overlay_items: &[Value]) -> Value {
    let id_field = array_id_field(base_items).or_else(|| array_id_field(overlay_items));

    let Some(id_field) = id_field else {
        return Value::Array(overlay_items.to_vec());
    };

    let mut by_id: BTreeMap<String, Value> = BTreeMap::new();
    for item in base_items {
        if let Some(id) = item_id(item, id_field) {
            by_id.insert(id, item.clone());
        }
    }
    for item in overlay_items {
        match item_id(item, id_field) {
            Some(id) => {
                let merged = match by_id.get(&id) {
                    Some(existing) => merge_documents(existing, item),
                    None => item.clone(),
                };
                by_id.insert(id, merged);
            }
            None => continue,
        }
    }

    Value::Array(by_id.into_values().collect())
}

/// Merges `base -> org -> tenant -> user` layers in order, treating any
/// `None` layer as an empty object.
#[must_use]
pub fn merge_layers(layers: &[Option<&Value>]) -> Value {
    let empty = Value::Object(serde_json::Map::new());
    layers
        .iter()
        .fold(empty, |acc, layer| merge_documents(&acc, layer.unwrap_or(&Value::Null)))
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_layer_is_treated_as_empty() {
        let base = json!({"a": 1});
        let merged = merge_documents(&base, &Value::Null);
        assert_eq!(merged, base);
    }

    #[test]
    fn scalar_fields_use_later_layer_wins() {
        let base = json!({"limits": {"max_budget_per_run": 100}});
        let overlay = json!({"limits": {"max_budget_per_run": 500}});
        let merged = merge_documents(&base, &overlay);
        assert_eq!(merged["limits"]["max_budget_per_run"], 500);
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let base = json!({"limits": {"max_budget_per_run": 100, "max_concurrent_steps": 4}});
        let overlay = json!({"limits": {"max_budget_per_run": 500}});
        let merged = merge_documents(&base, &overlay);
        assert_eq!(merged["limits"]["max_budget_per_run"], 500);
        assert_eq!(merged["limits"]["max_concurrent_steps"], 4);
    }

    #[test]
    fn arrays_merge_by_id_and_sort_deterministically() {
        let base = json!({"actions": [
            {"action_id": "b", "version": "1"},
            {"action_id": "a", "version": "1"},
        ]});
        let overlay = json!({"actions": [
            {"action_id": "a", "version": "2"},
        ]});
        let merged = merge_documents(&base, &overlay);
        let ids: Vec<&str> = merged["actions"]
            .as_array()
            .expect("array")
            .iter()
            .map(|a| a["action_id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(merged["actions"][0]["version"], "2");
    }

    #[test]
    fn overlay_only_item_is_added() {
        let base = json!({"actions": [{"action_id": "a", "version": "1"}]});
        let overlay = json!({"actions": [{"action_id": "z", "version": "1"}]});
        let merged = merge_documents(&base, &overlay);
        let ids: Vec<&str> = merged["actions"]
            .as_array()
            .expect("array")
            .iter()
            .map(|a| a["action_id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn merge_layers_folds_base_org_tenant_user_in_order() {
        let base = json!({"limits": {"max_budget_per_run": 100}});
        let org = json!({"limits": {"max_budget_per_run": 200}});
        let tenant: Value = Value::Null;
        let user = json!({"limits": {"max_concurrent_steps": 2}});
        let merged = merge_layers(&[Some(&base), Some(&org), None, Some(&user)]);
        let _ = tenant;
        assert_eq!(merged["limits"]["max_budget_per_run"], 200);
        assert_eq!(merged["limits"]["max_concurrent_steps"], 2);
    }
}

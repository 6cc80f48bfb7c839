//! Plan computation for resources.
//!
//! Computed attributes are unknown (null) in a plan unless they carry
//! [`PlanModifier::UseStateForUnknown`], in which case the prior state value is
//! planned instead. This is what keeps `id`, `email` and `password` stable
//! across name-only updates.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::schema::{Attribute, PlanModifier, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan a create, update or destroy of a single resource.
///
/// - `prior_state` is `None` when the resource does not exist yet.
/// - A null `proposed_state` plans a destroy.
pub fn plan_resource(
    schema: &Schema,
    prior_state: Option<&Value>,
    proposed_state: &Value,
) -> Result<PlanResult, ProviderError> {
    let prior = match prior_state {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            return Err(ProviderError::InvalidRequest(
                "prior state must be an object".to_string(),
            ))
        },
    };

    let proposed = match proposed_state {
        Value::Null => return Ok(plan_destroy(prior)),
        Value::Object(map) => map,
        _ => {
            return Err(ProviderError::InvalidRequest(
                "proposed state must be an object".to_string(),
            ))
        },
    };

    let mut planned = Map::new();
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.block.attributes {
        let prior_value = prior.and_then(|p| p.get(name)).filter(|v| !v.is_null());
        let value = planned_value(attr, prior_value, proposed.get(name));

        let after = (!value.is_null()).then(|| value.clone());
        if prior_value != after.as_ref() {
            if prior.is_some() && attr.force_new {
                requires_replace = true;
            }
            changes.push(AttributeChange::new(
                name.clone(),
                prior_value.cloned(),
                after,
            ));
        }

        planned.insert(name.clone(), value);
    }

    debug!(
        changes = changes.len(),
        requires_replace, "Planned resource change"
    );

    Ok(PlanResult::with_changes(
        Value::Object(planned),
        changes,
        requires_replace,
    ))
}

fn planned_value(attr: &Attribute, prior: Option<&Value>, proposed: Option<&Value>) -> Value {
    let computed_only = attr.flags.computed && !attr.flags.optional && !attr.flags.required;
    if computed_only {
        return match prior {
            Some(v) if attr.has_plan_modifier(PlanModifier::UseStateForUnknown) => v.clone(),
            _ => Value::Null,
        };
    }
    proposed.cloned().unwrap_or(Value::Null)
}

fn plan_destroy(prior: Option<&Map<String, Value>>) -> PlanResult {
    let changes = prior
        .map(|p| {
            p.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    PlanResult::with_changes(Value::Null, changes, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::server::server_schema;
    use serde_json::json;

    fn prior() -> Value {
        json!({
            "name": "one",
            "id": "abc123",
            "email": "x@abc123.mailosaur.net",
            "password": "s3cret",
        })
    }

    #[test]
    fn test_plan_create_leaves_computed_unknown() {
        let plan = plan_resource(&server_schema(), None, &json!({"name": "one"})).unwrap();

        assert_eq!(plan.planned_state["name"], "one");
        assert!(plan.planned_state["id"].is_null());
        assert!(plan.planned_state["email"].is_null());
        assert!(plan.planned_state["password"].is_null());
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "name");
        assert!(plan.changes[0].before.is_none());
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_update_keeps_computed_values() {
        let prior = prior();
        let proposed = json!({"name": "two", "id": null, "email": null, "password": null});
        let plan = plan_resource(&server_schema(), Some(&prior), &proposed).unwrap();

        assert_eq!(plan.planned_state["name"], "two");
        assert_eq!(plan.planned_state["id"], "abc123");
        assert_eq!(plan.planned_state["email"], "x@abc123.mailosaur.net");
        assert_eq!(plan.planned_state["password"], "s3cret");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(
            plan.changes[0],
            AttributeChange::modified("name", json!("one"), json!("two"))
        );
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_update_without_changes() {
        let prior = prior();
        let plan = plan_resource(&server_schema(), Some(&prior), &prior).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state, prior);
    }

    #[test]
    fn test_plan_computed_without_modifier_becomes_unknown() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("etag", Attribute::computed_string());
        let prior = json!({"name": "one", "etag": "v1"});
        let plan = plan_resource(&schema, Some(&prior), &json!({"name": "two"})).unwrap();

        assert!(plan.planned_state["etag"].is_null());
        let etag = plan.changes.iter().find(|c| c.path == "etag").unwrap();
        assert_eq!(etag.before, Some(json!("v1")));
        assert!(etag.after.is_none());
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let mut name = Attribute::required_string();
        name.force_new = true;
        let schema = Schema::v0().with_attribute("name", name);
        let plan =
            plan_resource(&schema, Some(&json!({"name": "one"})), &json!({"name": "two"}))
                .unwrap();
        assert!(plan.requires_replace);

        let plan = plan_resource(&schema, None, &json!({"name": "two"})).unwrap();
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_destroy() {
        let prior = prior();
        let plan = plan_resource(&server_schema(), Some(&prior), &Value::Null).unwrap();
        assert!(plan.planned_state.is_null());
        assert_eq!(plan.changes.len(), 4);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_plan_rejects_non_object() {
        let err = plan_resource(&server_schema(), None, &json!(["one"])).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}

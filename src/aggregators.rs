use serde_json::Value;

use crate::models::{Query, ResourceId, ResourceResult, Resources};

/// Applies the `in` clauses: each donor statement's body is inserted into
/// the target resource's body at the declared path, and the donor's own
/// body is cleared. Only single (non-multiplexed) donors and targets take
/// part; anything else is left untouched.
pub fn apply_aggregators(query: &Query, resources: &Resources) -> Resources {
    let mut result = resources.clone();

    for statement in &query.statements {
        let Some(target) = &statement.aggregate else {
            continue;
        };

        let donor_id = ResourceId::of(statement);
        let donor_body = match result.get(&donor_id) {
            Some(ResourceResult::One(done)) => done.result.unmarshal().clone(),
            _ => continue,
        };

        let Some(ResourceResult::One(target_done)) =
            result.get_mut(&ResourceId(target.resource.clone()))
        else {
            continue;
        };

        let mut target_body = target_done.result.unmarshal().clone();
        if !insert_at_path(&mut target_body, &target.path, donor_body) {
            continue;
        }
        target_done.result = target_body.into();

        if let Some(ResourceResult::One(donor)) = result.get_mut(&donor_id) {
            donor.result = Value::Null.into();
        }
    }

    result
}

/// Inserts a value at an object path, creating intermediate objects as
/// needed. Refuses paths that run through non-objects.
fn insert_at_path(body: &mut Value, path: &[String], value: Value) -> bool {
    let Some((field, rest)) = path.split_first() else {
        return false;
    };

    let Value::Object(map) = body else {
        return false;
    };

    if rest.is_empty() {
        map.insert(field.clone(), value);
        return true;
    }

    let child = map
        .entry(field.clone())
        .or_insert_with(|| Value::Object(Default::default()));
    insert_at_path(child, rest, value)
}

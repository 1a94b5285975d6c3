use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::error;

use crate::match_evaluator::{MatchError, MatchEvaluator};
use crate::models::{
    DoneResource, MatchFilter, OnlyField, Query, ResourceId, ResourceResult, Resources,
};

/// Returns a version of the resolved resources narrowed to the fields
/// selected by each statement's `only` clause.
pub fn apply_filters(
    match_evaluator: &dyn MatchEvaluator,
    query: &Query,
    resources: &Resources,
) -> Result<Resources, MatchError> {
    let mut result = Resources::new();

    for statement in &query.statements {
        let resource_id = ResourceId::of(statement);
        let Some(resource) = resources.get(&resource_id) else {
            continue;
        };

        let filtered = filter_resource(match_evaluator, &statement.only, resource).map_err(
            |err| {
                error!(resource = %resource_id, %err, "failed to apply filter on statement");
                err
            },
        )?;
        result.insert(resource_id, filtered);
    }

    Ok(result)
}

/// Returns a version of the resolved resources without the statements
/// marked `hidden`. Runs after filters and aggregators, since hidden
/// resources may still feed both. Every non-hidden statement keeps an
/// entry, even when it produced no resource.
pub fn apply_hidden(query: &Query, resources: &Resources) -> Resources {
    query
        .statements
        .iter()
        .filter(|statement| !statement.hidden)
        .map(|statement| {
            let resource_id = ResourceId::of(statement);
            let resource = resources.get(&resource_id).cloned().unwrap_or_default();
            (resource_id, resource)
        })
        .collect()
}

fn filter_resource(
    match_evaluator: &dyn MatchEvaluator,
    only: &[OnlyField],
    resource: &ResourceResult,
) -> Result<ResourceResult, MatchError> {
    if only.is_empty() {
        return Ok(resource.clone());
    }

    match resource {
        ResourceResult::One(done) => {
            let tree = build_filter_tree(only);
            let filtered = extract(match_evaluator, &tree, done.result.unmarshal())?;
            Ok(ResourceResult::One(DoneResource {
                details: done.details.clone(),
                result: filtered.into(),
            }))
        }
        ResourceResult::Many(results) => Ok(ResourceResult::Many(
            results
                .iter()
                .map(|nested| filter_resource(match_evaluator, only, nested))
                .collect::<Result<_, _>>()?,
        )),
    }
}

/// Merged prefix tree over the `only` paths. The wildcard token `*` never
/// becomes a child; it flags its level to retain all keys.
#[derive(Debug, Clone, Default)]
struct FilterTree {
    children: HashMap<String, FilterNode>,
    select_all: bool,
}

#[derive(Debug, Clone)]
enum FilterNode {
    /// Include the value as-is.
    Leaf,
    /// Include the value only where the regex agrees.
    Match(MatchFilter),
    Branch(FilterTree),
}

fn build_filter_tree(only: &[OnlyField]) -> FilterTree {
    let mut tree = FilterTree::default();
    for field in only {
        match field {
            OnlyField::Path(path) => insert_path(&mut tree, path, None),
            OnlyField::Match(filter) => insert_path(&mut tree, &filter.target, Some(filter)),
        }
    }
    tree
}

fn insert_path(tree: &mut FilterTree, path: &[String], leaf: Option<&MatchFilter>) {
    let Some((field, rest)) = path.split_first() else {
        return;
    };

    if field == "*" {
        tree.select_all = true;
        return;
    }

    if rest.is_empty() {
        let node = match leaf {
            Some(filter) => FilterNode::Match(filter.clone()),
            None => FilterNode::Leaf,
        };
        tree.children.insert(field.clone(), node);
        return;
    }

    let child = tree
        .children
        .entry(field.clone())
        .or_insert_with(|| FilterNode::Branch(FilterTree::default()));
    if !matches!(child, FilterNode::Branch(_)) {
        *child = FilterNode::Branch(FilterTree::default());
    }
    let FilterNode::Branch(subtree) = child else {
        unreachable!("child was just made a branch");
    };
    insert_path(subtree, rest, leaf);
}

fn extract(
    match_evaluator: &dyn MatchEvaluator,
    tree: &FilterTree,
    value: &Value,
) -> Result<Value, MatchError> {
    match value {
        Value::Object(map) => {
            let mut node = if tree.select_all {
                map.clone()
            } else {
                Map::new()
            };

            for (key, sub_filter) in &tree.children {
                let Some(child) = map.get(key) else {
                    continue;
                };

                match sub_filter {
                    FilterNode::Match(filter) => {
                        apply_match_filter(match_evaluator, filter, key, child, &mut node)?;
                    }
                    FilterNode::Leaf => {
                        node.insert(key.clone(), child.clone());
                    }
                    FilterNode::Branch(subtree) => {
                        node.insert(key.clone(), extract(match_evaluator, subtree, child)?);
                    }
                }
            }

            Ok(Value::Object(node))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| extract(match_evaluator, tree, item))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn apply_match_filter(
    match_evaluator: &dyn MatchEvaluator,
    filter: &MatchFilter,
    key: &str,
    value: &Value,
    node: &mut Map<String, Value>,
) -> Result<(), MatchError> {
    let regex = match_evaluator.parse_arg(&filter.arg)?;

    match value {
        Value::Array(items) => {
            let survivors: Vec<Value> = items
                .iter()
                .filter(|item| match_evaluator.match_value(&regex, item))
                .cloned()
                .collect();

            if survivors.is_empty() {
                node.remove(key);
            } else {
                node.insert(key.to_string(), Value::Array(survivors));
            }
        }
        other => {
            if match_evaluator.match_value(&regex, other) {
                node.insert(key.to_string(), other.clone());
            } else {
                node.remove(key);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "filters_tests.rs"]
mod tests;

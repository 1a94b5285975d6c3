use serde_json::Value;

use crate::models::{
    ChainRef, ParamValue, ResourceId, ResourceResult, Resources, Statement, WithClause,
};

/// A statement after chain resolution: either a single executable
/// statement or a positional fan-out over a list-shaped chain value.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementTree {
    One(Statement),
    Many(Vec<StatementTree>),
}

/// Outcome of resolving one chain reference.
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    /// The referenced value was absent or null.
    Empty,
    Single(Value),
    /// The reference hit a list: the statement multiplexes over it.
    Multiple(Vec<Resolved>),
}

/// Resolves every chained param of a statement against the partial
/// resources of previous waves and expands list-shaped chain values into a
/// multiplexed statement tree.
pub fn resolve_statement(statement: &Statement, resources: &Resources) -> StatementTree {
    let params: Vec<(String, Param)> = statement
        .with
        .iter()
        .map(|(name, value)| (name.clone(), resolve_param(value, resources)))
        .collect();

    expand(params, statement)
}

/// A top-level param mid-expansion. `Fan` marks a chain that resolved to a
/// list and still needs to be unrolled into sub-statements.
#[derive(Debug, Clone)]
enum Param {
    Fixed(ParamValue),
    Fan(Vec<Param>),
}

fn expand(params: Vec<(String, Param)>, statement: &Statement) -> StatementTree {
    let fan_position = params
        .iter()
        .position(|(_, param)| matches!(param, Param::Fan(_)));

    match fan_position {
        None => {
            let with = WithClause::new(
                params
                    .into_iter()
                    .map(|(name, param)| match param {
                        Param::Fixed(value) => (name, value),
                        // Unreachable: no Fan entries remain at this point.
                        Param::Fan(_) => (name, ParamValue::EmptyChained),
                    })
                    .collect(),
            );
            StatementTree::One(Statement {
                with,
                ..statement.clone()
            })
        }
        Some(position) => {
            let items = match &params[position].1 {
                Param::Fan(items) => items.clone(),
                Param::Fixed(_) => unreachable!(),
            };
            StatementTree::Many(
                items
                    .into_iter()
                    .map(|item| {
                        let mut sub = params.clone();
                        sub[position].1 = item;
                        expand(sub, statement)
                    })
                    .collect(),
            )
        }
    }
}

fn resolve_param(value: &ParamValue, resources: &Resources) -> Param {
    match value {
        ParamValue::Chain(chain) => to_param(resolve_chain(chain, resources)),
        // Chains nested inside structured params resolve in place; a list
        // there stays a plain list value instead of multiplexing.
        ParamValue::List(items) => Param::Fixed(ParamValue::List(
            items
                .iter()
                .map(|item| resolve_nested(item, resources))
                .collect(),
        )),
        ParamValue::Object(fields) => Param::Fixed(ParamValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), resolve_nested(v, resources)))
                .collect(),
        )),
        other => Param::Fixed(other.clone()),
    }
}

fn to_param(resolved: Resolved) -> Param {
    match resolved {
        Resolved::Empty => Param::Fixed(ParamValue::EmptyChained),
        Resolved::Single(v) => Param::Fixed(ParamValue::Plain(v)),
        Resolved::Multiple(items) => Param::Fan(items.into_iter().map(to_param).collect()),
    }
}

fn resolve_nested(value: &ParamValue, resources: &Resources) -> ParamValue {
    match value {
        ParamValue::Chain(chain) => match resolve_chain(chain, resources) {
            Resolved::Empty => ParamValue::EmptyChained,
            Resolved::Single(v) => ParamValue::Plain(v),
            multiple @ Resolved::Multiple(_) => ParamValue::Plain(resolved_to_value(&multiple)),
        },
        ParamValue::List(items) => ParamValue::List(
            items
                .iter()
                .map(|item| resolve_nested(item, resources))
                .collect(),
        ),
        ParamValue::Object(fields) => ParamValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), resolve_nested(v, resources)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolved_to_value(resolved: &Resolved) -> Value {
    match resolved {
        Resolved::Empty => Value::Null,
        Resolved::Single(v) => v.clone(),
        Resolved::Multiple(items) => Value::Array(items.iter().map(resolved_to_value).collect()),
    }
}

fn resolve_chain(chain: &ChainRef, resources: &Resources) -> Resolved {
    let target = match resources.get(&ResourceId(chain.resource.clone())) {
        Some(target) => target,
        None => return Resolved::Empty,
    };
    walk_result(target, &chain.path)
}

fn walk_result(result: &ResourceResult, path: &[String]) -> Resolved {
    match result {
        ResourceResult::One(done) => match walk_value(done.result.unmarshal(), path) {
            None | Some(Value::Null) => Resolved::Empty,
            Some(Value::Array(items)) => {
                Resolved::Multiple(items.into_iter().map(classify).collect())
            }
            Some(value) => Resolved::Single(value),
        },
        ResourceResult::Many(results) => Resolved::Multiple(
            results
                .iter()
                .map(|nested| walk_result(nested, path))
                .collect(),
        ),
    }
}

fn classify(value: Value) -> Resolved {
    match value {
        Value::Null => Resolved::Empty,
        Value::Array(items) => Resolved::Multiple(items.into_iter().map(classify).collect()),
        other => Resolved::Single(other),
    }
}

/// Walks a field path through a body. Arrays are traversed element-wise,
/// collecting one entry per element.
fn walk_value(value: &Value, path: &[String]) -> Option<Value> {
    let Some((field, rest)) = path.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => walk_value(map.get(field)?, rest),
        Value::Array(items) => {
            let collected: Vec<Value> = items
                .iter()
                .map(|item| walk_value(item, path).unwrap_or(Value::Null))
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

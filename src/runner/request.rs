use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;

use crate::mappings::Mapping;
use crate::models::{HttpRequest, QueryContext, Statement};

/// Builds the upstream call plan for a statement whose params are fully
/// resolved.
///
/// Path placeholders consume their params; the remainder becomes the query
/// string for read methods or the JSON body for write methods, layered on
/// top of the mapping's fixed query template. Input headers matching the
/// forward prefix are propagated. The request timeout is the statement's
/// own (or the resource default), capped by the query deadline.
pub fn make_request(
    resource_timeout: Duration,
    query_deadline: Duration,
    forward_prefix: &str,
    mapping: &Mapping,
    statement: &Statement,
    query_ctx: &QueryContext,
) -> HttpRequest {
    let params: HashMap<String, Value> = statement
        .with
        .iter()
        .map(|(name, value)| (name.clone(), value.to_value()))
        .collect();

    let (path, consumed) = mapping.path_with_params(&params);

    let mut query: BTreeMap<String, Value> = mapping
        .query_template()
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut remaining: BTreeMap<String, Value> = params
        .into_iter()
        .filter(|(name, _)| !consumed.contains(name))
        .collect();

    let body = if statement.method.sends_body() {
        if remaining.is_empty() {
            query_ctx.input.body.clone()
        } else {
            Some(Value::Object(std::mem::take(&mut remaining).into_iter().collect()))
        }
    } else {
        query.append(&mut remaining);
        None
    };

    let headers: HashMap<String, String> = query_ctx
        .input
        .headers
        .iter()
        .filter(|(name, _)| name.starts_with(forward_prefix))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let timeout = statement
        .timeout
        .unwrap_or(resource_timeout)
        .min(query_deadline);

    HttpRequest {
        scheme: mapping.scheme().to_string(),
        host: mapping.host().to_string(),
        path,
        query,
        headers,
        body,
        method: statement.method,
        timeout,
    }
}

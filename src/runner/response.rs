use std::fmt::Write as _;

use serde_json::Value;

use crate::http::HttpError;
use crate::models::{
    CacheControl, Debugging, Details, DoneResource, HttpRequest, HttpResponse, Statement,
};

/// Per-statement settings carried into the outcome envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoneResourceOptions {
    pub ignore_errors: bool,
    pub cache_control: CacheControl,
    pub debugging: bool,
}

impl DoneResourceOptions {
    pub fn of(statement: &Statement, debugging: bool) -> Self {
        DoneResourceOptions {
            ignore_errors: statement.ignore_errors,
            cache_control: statement.cache_control,
            debugging,
        }
    }
}

fn success_of(status: u16) -> bool {
    (200..400).contains(&status)
}

fn cache_control_of(options: DoneResourceOptions) -> Option<CacheControl> {
    let cc = options.cache_control;
    (cc.max_age.is_some() || cc.s_max_age.is_some()).then_some(cc)
}

fn debug_of(
    options: DoneResourceOptions,
    request: &HttpRequest,
    response: &HttpResponse,
) -> Option<Debugging> {
    options.debugging.then(|| Debugging {
        url: if response.url.is_empty() {
            request.url()
        } else {
            response.url.clone()
        },
        request_headers: request.headers.clone(),
        response_headers: response.headers.clone(),
        params: request.query.clone(),
        response_time_ms: response.duration.as_millis(),
    })
}

/// Outcome of a successfully executed request; success still reflects the
/// upstream status code.
pub fn new_done_resource(
    request: &HttpRequest,
    response: &HttpResponse,
    options: DoneResourceOptions,
) -> DoneResource {
    DoneResource {
        details: Details {
            status: response.status_code,
            success: success_of(response.status_code),
            ignore_errors: options.ignore_errors,
            cache_control: cache_control_of(options),
            debug: debug_of(options, request, response),
        },
        result: response.body.clone(),
    }
}

/// Outcome of a request that hit its per-request timeout.
pub fn new_timeout_response(
    error: &HttpError,
    request: &HttpRequest,
    response: &HttpResponse,
    options: DoneResourceOptions,
) -> DoneResource {
    DoneResource {
        details: Details {
            status: 408,
            success: false,
            ignore_errors: options.ignore_errors,
            cache_control: cache_control_of(options),
            debug: debug_of(options, request, response),
        },
        result: Value::String(error.to_string()).into(),
    }
}

/// Outcome of a request that failed in transport. The status comes from
/// the synthesized response when one exists, 500 otherwise.
pub fn new_error_response(
    error: &HttpError,
    request: &HttpRequest,
    options: DoneResourceOptions,
) -> DoneResource {
    let response = error.response();
    let status = if response.status_code == 0 {
        500
    } else {
        response.status_code
    };

    DoneResource {
        details: Details {
            status,
            success: false,
            ignore_errors: options.ignore_errors,
            cache_control: cache_control_of(options),
            debug: debug_of(options, request, response),
        },
        result: Value::String(error.to_string()).into(),
    }
}

/// Outcome of a statement skipped because chained params came back empty.
/// No request is issued for it.
pub fn new_empty_chained_response(
    params: &[String],
    options: DoneResourceOptions,
) -> DoneResource {
    let mut names = String::new();
    for param in params {
        let _ = write!(names, ":{param} ");
    }

    DoneResource {
        details: Details {
            status: 400,
            success: false,
            ignore_errors: options.ignore_errors,
            cache_control: cache_control_of(options),
            debug: None,
        },
        result: Value::String(format!(
            "The request was skipped due to missing {{ {names}}} param value"
        ))
        .into(),
    }
}

/// Names of `with` params carrying the empty-chain sentinel at any depth,
/// in declaration order.
pub fn get_empty_chained_params(statement: &Statement) -> Vec<String> {
    statement
        .with
        .iter()
        .filter(|(_, value)| value.has_empty_chained())
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;

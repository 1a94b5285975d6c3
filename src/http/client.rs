use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::http::dns_cache::{CachingDnsResolver, RefreshGuard};
use crate::http::{HttpClient, HttpError};
use crate::models::{HttpRequest, HttpResponse, Method, ResponseBody};
use crate::plugins::PluginRegistry;

/// HTTP client backed by a shared `reqwest` connection pool and the
/// caching DNS resolver. One instance serves every query.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    plugins: Arc<PluginRegistry>,
    _dns_refresh: RefreshGuard,
}

impl ReqwestHttpClient {
    pub fn new(config: &ClientConfig, plugins: Arc<PluginRegistry>) -> anyhow::Result<Self> {
        let resolver = CachingDnsResolver::new();
        let dns_refresh = resolver.start_refresh(config.dns_refresh_interval());

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(config.idle_conn_timeout())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .dns_resolver(Arc::new(resolver))
            .build()?;

        Ok(ReqwestHttpClient {
            client,
            plugins,
            _dns_refresh: dns_refresh,
        })
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url());

        let pairs = query_pairs(&request.query);
        if !pairs.is_empty() {
            builder = builder.query(&pairs);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;

        let url = response.url().to_string();
        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            url,
            status_code,
            headers,
            body: ResponseBody::from_bytes(body.to_vec()),
            duration: Default::default(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let hook_ctx = self.plugins.run_before_request(&request);

        let started = Instant::now();
        let outcome = tokio::time::timeout(request.timeout, self.execute(&request)).await;
        let duration = started.elapsed();

        match outcome {
            Ok(Ok(mut response)) => {
                response.duration = duration;
                debug!(
                    url = %response.url,
                    status = response.status_code,
                    duration_ms = duration.as_millis() as u64,
                    "request execution done"
                );
                self.plugins
                    .run_after_request(&hook_ctx, &request, &response, None);
                Ok(response)
            }
            Ok(Err(err)) if err.is_timeout() => {
                let response = synthesized_response(&request, 408, duration);
                let error = HttpError::Timeout {
                    response: response.clone(),
                };
                info!(
                    url = %request.url(),
                    method = %request.method,
                    duration_ms = duration.as_millis() as u64,
                    "request timed out"
                );
                self.plugins
                    .run_after_request(&hook_ctx, &request, &response, Some(&error));
                Err(error)
            }
            Ok(Err(err)) => {
                let status = err.status().map(|s| s.as_u16()).unwrap_or(500);
                let response = synthesized_response(&request, status, duration);
                let error = HttpError::RequestFailed {
                    message: err.to_string(),
                    response: response.clone(),
                };
                debug!(url = %request.url(), %err, "request execution failed");
                self.plugins
                    .run_after_request(&hook_ctx, &request, &response, Some(&error));
                Err(error)
            }
            Err(_elapsed) => {
                let response = synthesized_response(&request, 408, duration);
                let error = HttpError::Timeout {
                    response: response.clone(),
                };
                info!(
                    url = %request.url(),
                    method = %request.method,
                    duration_ms = duration.as_millis() as u64,
                    "request timed out"
                );
                self.plugins
                    .run_after_request(&hook_ctx, &request, &response, Some(&error));
                Err(error)
            }
        }
    }
}

fn synthesized_response(
    request: &HttpRequest,
    status_code: u16,
    duration: std::time::Duration,
) -> HttpResponse {
    HttpResponse {
        url: request.url(),
        status_code,
        headers: HashMap::new(),
        body: ResponseBody::default(),
        duration,
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

/// Renders query values as wire pairs: arrays repeat the key, scalars use
/// their JSON rendering, nulls are dropped.
fn query_pairs(query: &std::collections::BTreeMap<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in query {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if !item.is_null() {
                        pairs.push((key.clone(), scalar_to_string(item)));
                    }
                }
            }
            other => pairs.push((key.clone(), scalar_to_string(other))),
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn query_pairs_flatten_arrays_and_skip_nulls() {
        let query = BTreeMap::from([
            ("id".to_string(), json!([1, 2])),
            ("name".to_string(), json!("batman")),
            ("gone".to_string(), json!(null)),
        ]);

        let pairs = query_pairs(&query);

        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "1".to_string()),
                ("id".to_string(), "2".to_string()),
                ("name".to_string(), "batman".to_string()),
            ]
        );
    }

    #[test]
    fn synthesized_responses_carry_request_url() {
        let request = HttpRequest {
            scheme: "http".to_string(),
            host: "hero.api".to_string(),
            path: "/hero".to_string(),
            ..Default::default()
        };

        let response = synthesized_response(&request, 408, Default::default());

        assert_eq!(response.url, "http://hero.api/hero");
        assert_eq!(response.status_code, 408);
    }
}

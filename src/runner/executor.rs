use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::debug;

use crate::http::{HttpClient, HttpError};
use crate::models::{Details, DoneResource, QueryContext, ResourceResult, Statement};
use crate::runner::chain::StatementTree;
use crate::runner::request::make_request;
use crate::runner::response::{
    get_empty_chained_params, new_done_resource, new_empty_chained_response, new_error_response,
    new_timeout_response, DoneResourceOptions,
};

/// Resolves single statements against upstream services and fans out over
/// multiplexed ones.
pub struct Executor {
    client: Arc<dyn HttpClient>,
    resource_timeout: Duration,
    global_timeout: Duration,
    forward_prefix: String,
}

impl Executor {
    pub fn new(
        client: Arc<dyn HttpClient>,
        resource_timeout: Duration,
        global_timeout: Duration,
        forward_prefix: String,
    ) -> Self {
        Executor {
            client,
            resource_timeout,
            global_timeout,
            forward_prefix,
        }
    }

    /// Resolves one statement. Statements whose chained params came back
    /// empty are skipped without touching the network.
    pub async fn do_statement(
        &self,
        statement: &Statement,
        query_ctx: &QueryContext,
    ) -> DoneResource {
        let options = DoneResourceOptions::of(statement, query_ctx.options.debug);

        let empty_chained_params = get_empty_chained_params(statement);
        if !empty_chained_params.is_empty() {
            debug!(
                resource = %statement.resource,
                method = %statement.method,
                "request execution skipped due to empty chained parameters"
            );
            return new_empty_chained_response(&empty_chained_params, options);
        }

        let Some(mapping) = query_ctx.mappings.get(&statement.resource) else {
            return missing_mapping_response(statement, options);
        };

        let query_deadline = query_ctx
            .options
            .global_timeout
            .unwrap_or(self.global_timeout);
        let request = make_request(
            self.resource_timeout,
            query_deadline,
            &self.forward_prefix,
            mapping,
            statement,
            query_ctx,
        );

        debug!(
            resource = %statement.resource,
            method = %statement.method,
            url = %request.url(),
            "executing request for statement"
        );

        match self.client.do_request(request.clone()).await {
            Ok(response) => new_done_resource(&request, &response, options),
            Err(error @ HttpError::Timeout { .. }) => {
                let response = error.response().clone();
                new_timeout_response(&error, &request, &response, options)
            }
            Err(error) => {
                debug!(
                    resource = %statement.resource,
                    method = %statement.method,
                    %error,
                    "request execution failed"
                );
                new_error_response(&error, &request, options)
            }
        }
    }

    /// Resolves a statement tree: leaves execute directly, fan-outs run
    /// their elements concurrently with positional results.
    pub fn do_statement_tree<'a>(
        &'a self,
        tree: &'a StatementTree,
        query_ctx: &'a QueryContext,
    ) -> BoxFuture<'a, ResourceResult> {
        Box::pin(async move {
            match tree {
                StatementTree::One(statement) => {
                    ResourceResult::One(self.do_statement(statement, query_ctx).await)
                }
                StatementTree::Many(items) => ResourceResult::Many(
                    join_all(
                        items
                            .iter()
                            .map(|item| self.do_statement_tree(item, query_ctx)),
                    )
                    .await,
                ),
            }
        })
    }
}

fn missing_mapping_response(
    statement: &Statement,
    options: DoneResourceOptions,
) -> DoneResource {
    DoneResource {
        details: Details {
            status: 422,
            success: false,
            ignore_errors: options.ignore_errors,
            ..Default::default()
        },
        result: Value::String(format!(
            "no mapping found for resource {}",
            statement.resource
        ))
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::Mapping;
    use crate::models::{HttpRequest, HttpResponse, ParamValue, ResponseBody, WithClause};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubClient {
        calls: AtomicUsize,
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
    }

    impl StubClient {
        fn ok() -> Arc<Self> {
            Arc::new(StubClient {
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                status: 200,
            })
        }
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = request
                .query
                .get("id")
                .cloned()
                .unwrap_or(Value::Null);
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status_code: self.status,
                body: ResponseBody::from_value(json!({ "id": id })),
                ..Default::default()
            })
        }
    }

    struct TimeoutClient;

    #[async_trait]
    impl HttpClient for TimeoutClient {
        async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            Err(HttpError::Timeout {
                response: HttpResponse {
                    url: request.url(),
                    status_code: 408,
                    ..Default::default()
                },
            })
        }
    }

    fn executor(client: Arc<dyn HttpClient>) -> Executor {
        Executor::new(
            client,
            Duration::from_secs(5),
            Duration::from_secs(30),
            "c_".to_string(),
        )
    }

    fn hero_context() -> QueryContext {
        QueryContext {
            mappings: HashMap::from([(
                "hero".to_string(),
                Mapping::new("hero", "http://hero.api/hero").unwrap(),
            )]),
            ..Default::default()
        }
    }

    fn hero_statement(params: Vec<(&str, ParamValue)>) -> Statement {
        Statement {
            resource: "hero".to_string(),
            with: WithClause::new(
                params
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_chained_statement_skips_the_network() {
        let client = StubClient::ok();
        let executor = executor(client.clone());
        let statement = hero_statement(vec![("id", ParamValue::EmptyChained)]);

        let done = executor.do_statement(&statement, &hero_context()).await;

        assert_eq!(done.details.status, 400);
        assert!(!done.details.success);
        assert_eq!(
            done.result.unmarshal(),
            &json!("The request was skipped due to missing { :id } param value")
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_statement_produces_done_resource() {
        let client = StubClient::ok();
        let executor = executor(client.clone());
        let statement = hero_statement(vec![("id", ParamValue::Plain(json!("1")))]);

        let done = executor.do_statement(&statement, &hero_context()).await;

        assert_eq!(done.details.status, 200);
        assert!(done.details.success);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_statement_produces_408_resource() {
        let executor = executor(Arc::new(TimeoutClient));
        let statement = hero_statement(vec![]);

        let done = executor.do_statement(&statement, &hero_context()).await;

        assert_eq!(done.details.status, 408);
        assert!(!done.details.success);
        assert_eq!(done.result.unmarshal(), &json!("request timed out"));
    }

    #[tokio::test]
    async fn unmapped_resource_produces_failed_resource() {
        let client = StubClient::ok();
        let executor = executor(client.clone());
        let statement = Statement {
            resource: "villain".to_string(),
            ..Default::default()
        };

        let done = executor.do_statement(&statement, &hero_context()).await;

        assert!(!done.details.success);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multiplexed_statements_keep_positional_order() {
        let client = StubClient::ok();
        let executor = executor(client.clone());
        let ctx = hero_context();

        let tree = StatementTree::Many(
            ["a", "b", "c"]
                .iter()
                .map(|id| {
                    StatementTree::One(hero_statement(vec![(
                        "id",
                        ParamValue::Plain(json!(id)),
                    )]))
                })
                .collect(),
        );

        let result = executor.do_statement_tree(&tree, &ctx).await;

        let ResourceResult::Many(results) = result else {
            panic!("expected multiplexed result");
        };
        let ids: Vec<_> = results
            .iter()
            .map(|r| r.single().unwrap().result.unmarshal()["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn nested_multiplexed_statements_nest_results() {
        let client = StubClient::ok();
        let executor = executor(client.clone());
        let ctx = hero_context();

        let leaf = |id: &str| {
            StatementTree::One(hero_statement(vec![("id", ParamValue::Plain(json!(id)))]))
        };
        let tree = StatementTree::Many(vec![
            StatementTree::Many(vec![leaf("a"), leaf("b")]),
            leaf("c"),
        ]);

        let result = executor.do_statement_tree(&tree, &ctx).await;

        let ResourceResult::Many(results) = result else {
            panic!("expected multiplexed result");
        };
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], ResourceResult::Many(ref inner) if inner.len() == 2));
        assert!(matches!(results[1], ResourceResult::One(_)));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::aggregators::apply_aggregators;
use crate::filters::{apply_filters, apply_hidden};
use crate::mappings::{Mapping, MappingError, MappingsReader};
use crate::match_evaluator::{MatchError, MatchEvaluator};
use crate::models::{Query, QueryContext, QueryInput, QueryOptions, Resources};
use crate::plugins::PluginRegistry;
use crate::runner::{Runner, RunnerError};

/// Parses query text into a [`Query`]. The syntax is owned by the
/// embedding application; the engine only consumes the parsed form.
pub trait Parser: Send + Sync {
    fn parse(&self, text: &str) -> anyhow::Result<Query>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueryReaderError {
    #[error("query not found: {namespace}/{id} revision {revision}")]
    NotFound {
        namespace: String,
        id: String,
        revision: u64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fetches saved query text by identity.
#[async_trait]
pub trait QueryReader: Send + Sync {
    async fn get(&self, namespace: &str, id: &str, revision: u64)
        -> Result<String, QueryReaderError>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("revision must be greater than 0")]
    InvalidRevision,

    #[error("query id must be not empty")]
    InvalidQueryId,

    #[error("namespace must be not empty")]
    InvalidNamespace,

    #[error("no mapping found for resource {0}")]
    UnknownResource(String),
}

/// Error surface of the evaluator facade.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("query not found: {namespace}/{id} revision {revision}")]
    NotFound {
        namespace: String,
        id: String,
        revision: u64,
    },

    #[error("invalid query syntax: {0}")]
    Parser(#[source] anyhow::Error),

    #[error("query timed out")]
    Timeout(#[source] RunnerError),

    #[error(transparent)]
    Mappings(#[from] MappingError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Runner(RunnerError),

    #[error("failed to read query: {0}")]
    QueryReader(#[source] anyhow::Error),
}

/// Top-level coordinator: wires the parser, saved-query storage, mappings,
/// runner, plugin hooks and post-processors into one entry point.
pub struct Evaluator {
    parser: Arc<dyn Parser>,
    query_reader: Arc<dyn QueryReader>,
    mappings_reader: Arc<MappingsReader>,
    runner: Runner,
    plugins: Arc<PluginRegistry>,
    match_evaluator: Arc<dyn MatchEvaluator>,
}

impl Evaluator {
    pub fn new(
        parser: Arc<dyn Parser>,
        query_reader: Arc<dyn QueryReader>,
        mappings_reader: Arc<MappingsReader>,
        runner: Runner,
        plugins: Arc<PluginRegistry>,
        match_evaluator: Arc<dyn MatchEvaluator>,
    ) -> Self {
        Evaluator {
            parser,
            query_reader,
            mappings_reader,
            runner,
            plugins,
            match_evaluator,
        }
    }

    /// Evaluates a saved query: fetch, parse, resolve every statement, then
    /// shape the outcome through filters, aggregators and hidden removal.
    ///
    /// `after_query` hooks observe the post-filter, post-aggregation,
    /// pre-hidden resources; the caller receives the result without hidden
    /// statements.
    pub async fn saved_query(
        &self,
        options: QueryOptions,
        input: QueryInput,
    ) -> Result<Resources, EvalError> {
        validate_query_options(&options)?;

        let query_text = self
            .query_reader
            .get(&options.namespace, &options.id, options.revision)
            .await
            .map_err(|err| match err {
                QueryReaderError::NotFound {
                    namespace,
                    id,
                    revision,
                } => EvalError::NotFound {
                    namespace,
                    id,
                    revision,
                },
                QueryReaderError::Other(inner) => EvalError::QueryReader(inner),
            })?;

        let query = self.parser.parse(&query_text).map_err(|err| {
            debug!(%err, "failed to parse query");
            EvalError::Parser(err)
        })?;

        let mappings = self.mappings_reader.from_tenant(&options.tenant).await?;
        validate_query_resources(&query, &mappings)?;

        let query_ctx = QueryContext {
            mappings,
            options,
            input,
        };

        self.plugins.run_before_query(&query_text, &query_ctx);

        let resources = self
            .runner
            .execute_query(&query, &query_ctx)
            .await
            .map_err(|err| match err {
                RunnerError::QueryTimedOut => EvalError::Timeout(err),
                other => EvalError::Runner(other),
            })?;

        let resources = apply_filters(self.match_evaluator.as_ref(), &query, &resources)?;
        let resources = apply_aggregators(&query, &resources);

        self.plugins.run_after_query(&query_text, &resources);

        Ok(apply_hidden(&query, &resources))
    }
}

fn validate_query_options(options: &QueryOptions) -> Result<(), ValidationError> {
    if options.revision == 0 {
        return Err(ValidationError::InvalidRevision);
    }
    if options.id.is_empty() {
        return Err(ValidationError::InvalidQueryId);
    }
    if options.namespace.is_empty() {
        return Err(ValidationError::InvalidNamespace);
    }
    Ok(())
}

fn validate_query_resources(
    query: &Query,
    mappings: &HashMap<String, Mapping>,
) -> Result<(), ValidationError> {
    for statement in &query.statements {
        if !mappings.contains_key(&statement.resource) {
            return Err(ValidationError::UnknownResource(statement.resource.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::http::{HttpClient, HttpError};
    use crate::mappings::{Database, EnvSource};
    use crate::match_evaluator::DefaultMatchEvaluator;
    use crate::models::{
        HttpRequest, HttpResponse, ResourceId, ResponseBody, Statement,
    };
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubParser {
        query: Query,
    }

    impl Parser for StubParser {
        fn parse(&self, _text: &str) -> anyhow::Result<Query> {
            Ok(self.query.clone())
        }
    }

    struct FailingParser;

    impl Parser for FailingParser {
        fn parse(&self, _text: &str) -> anyhow::Result<Query> {
            Err(anyhow!("unexpected token"))
        }
    }

    struct StubQueryReader {
        result: Option<String>,
    }

    #[async_trait]
    impl QueryReader for StubQueryReader {
        async fn get(
            &self,
            namespace: &str,
            id: &str,
            revision: u64,
        ) -> Result<String, QueryReaderError> {
            match &self.result {
                Some(text) => Ok(text.clone()),
                None => Err(QueryReaderError::NotFound {
                    namespace: namespace.to_string(),
                    id: id.to_string(),
                    revision,
                }),
            }
        }
    }

    struct EmptyDatabase;

    #[async_trait]
    impl Database for EmptyDatabase {
        async fn find_mappings_for_tenant(
            &self,
            _tenant: &str,
        ) -> anyhow::Result<Vec<crate::mappings::Mapping>> {
            Ok(Vec::new())
        }
    }

    struct EmptyEnv;

    impl EnvSource for EmptyEnv {
        fn get_all(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    struct StubClient;

    #[async_trait]
    impl HttpClient for StubClient {
        async fn do_request(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
            Ok(HttpResponse {
                status_code: 200,
                body: ResponseBody::from_value(json!({"id": "h1", "name": "bruce", "age": 40})),
                ..Default::default()
            })
        }
    }

    fn mappings_reader() -> Arc<MappingsReader> {
        let local = HashMap::from([(
            "default".to_string(),
            HashMap::from([("hero".to_string(), "http://hero.api/hero".to_string())]),
        )]);
        Arc::new(MappingsReader::new(
            Arc::new(EmptyEnv),
            local,
            Arc::new(EmptyDatabase),
        ))
    }

    fn evaluator_with(query: Query, reader: StubQueryReader) -> Evaluator {
        Evaluator::new(
            Arc::new(StubParser { query }),
            Arc::new(reader),
            mappings_reader(),
            Runner::new(Arc::new(StubClient), &EngineConfig::default()),
            Arc::new(PluginRegistry::default()),
            Arc::new(DefaultMatchEvaluator),
        )
    }

    fn options() -> QueryOptions {
        QueryOptions {
            namespace: "ns".to_string(),
            id: "heroes".to_string(),
            revision: 1,
            tenant: "default".to_string(),
            ..Default::default()
        }
    }

    fn hero_query() -> Query {
        Query {
            statements: vec![Statement {
                resource: "hero".to_string(),
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn rejects_zero_revision() {
        let evaluator = evaluator_with(
            hero_query(),
            StubQueryReader {
                result: Some("from hero".into()),
            },
        );
        let opts = QueryOptions {
            revision: 0,
            ..options()
        };

        let err = evaluator
            .saved_query(opts, QueryInput::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EvalError::Validation(ValidationError::InvalidRevision)
        ));
    }

    #[tokio::test]
    async fn rejects_empty_id_and_namespace() {
        let evaluator = evaluator_with(
            hero_query(),
            StubQueryReader {
                result: Some("from hero".into()),
            },
        );

        let err = evaluator
            .saved_query(
                QueryOptions {
                    id: String::new(),
                    ..options()
                },
                QueryInput::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::Validation(ValidationError::InvalidQueryId)
        ));

        let err = evaluator
            .saved_query(
                QueryOptions {
                    namespace: String::new(),
                    ..options()
                },
                QueryInput::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::Validation(ValidationError::InvalidNamespace)
        ));
    }

    #[tokio::test]
    async fn propagates_not_found_from_query_reader() {
        let evaluator = evaluator_with(hero_query(), StubQueryReader { result: None });

        let err = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn wraps_parser_failures() {
        let evaluator = Evaluator::new(
            Arc::new(FailingParser),
            Arc::new(StubQueryReader {
                result: Some("from hero".into()),
            }),
            mappings_reader(),
            Runner::new(Arc::new(StubClient), &EngineConfig::default()),
            Arc::new(PluginRegistry::default()),
            Arc::new(DefaultMatchEvaluator),
        );

        let err = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Parser(_)));
    }

    #[tokio::test]
    async fn rejects_statements_without_mapping() {
        let query = Query {
            statements: vec![Statement {
                resource: "villain".to_string(),
                ..Default::default()
            }],
        };
        let evaluator = evaluator_with(
            query,
            StubQueryReader {
                result: Some("from villain".into()),
            },
        );

        let err = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EvalError::Validation(ValidationError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn resolves_filters_and_returns_resources() {
        let mut query = hero_query();
        query.statements[0].only = vec![crate::models::OnlyField::Path(vec!["name".to_string()])];
        let evaluator = evaluator_with(
            query,
            StubQueryReader {
                result: Some("from hero only name".into()),
            },
        );

        let resources = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap();

        let hero = resources.get(&ResourceId::from("hero")).unwrap();
        assert_eq!(
            hero.single().unwrap().result.unmarshal(),
            &json!({"name": "bruce"})
        );
    }

    #[tokio::test]
    async fn hidden_statements_are_removed_from_the_result() {
        let mut query = hero_query();
        query.statements[0].hidden = true;
        let evaluator = evaluator_with(
            query,
            StubQueryReader {
                result: Some("from hero hidden".into()),
            },
        );

        let resources = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap();

        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn after_query_hook_sees_pre_hidden_resources() {
        struct ObservingPlugin {
            saw_hero: Arc<AtomicBool>,
        }

        impl crate::plugins::LifecycleHooks for ObservingPlugin {
            fn after_query(&self, _query: &str, resources: &Resources) {
                if resources.contains_key(&ResourceId::from("hero")) {
                    self.saw_hero.store(true, Ordering::SeqCst);
                }
            }
        }

        let saw_hero = Arc::new(AtomicBool::new(false));
        let mut query = hero_query();
        query.statements[0].hidden = true;

        let evaluator = Evaluator::new(
            Arc::new(StubParser { query }),
            Arc::new(StubQueryReader {
                result: Some("from hero hidden".into()),
            }),
            mappings_reader(),
            Runner::new(Arc::new(StubClient), &EngineConfig::default()),
            Arc::new(PluginRegistry::new(vec![Box::new(ObservingPlugin {
                saw_hero: saw_hero.clone(),
            })])),
            Arc::new(DefaultMatchEvaluator),
        );

        let resources = evaluator
            .saved_query(options(), QueryInput::default())
            .await
            .unwrap();

        assert!(resources.is_empty());
        assert!(saw_hero.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn query_timeout_surfaces_as_timeout_error() {
        struct SlowClient;

        #[async_trait]
        impl HttpClient for SlowClient {
            async fn do_request(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(HttpResponse::default())
            }
        }

        let evaluator = Evaluator::new(
            Arc::new(StubParser {
                query: hero_query(),
            }),
            Arc::new(StubQueryReader {
                result: Some("from hero".into()),
            }),
            mappings_reader(),
            Runner::new(Arc::new(SlowClient), &EngineConfig::default()),
            Arc::new(PluginRegistry::default()),
            Arc::new(DefaultMatchEvaluator),
        );

        let opts = QueryOptions {
            global_timeout: Some(std::time::Duration::from_millis(20)),
            ..options()
        };

        let err = evaluator
            .saved_query(opts, QueryInput::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Timeout(_)));
    }
}

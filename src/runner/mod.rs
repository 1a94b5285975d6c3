use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::config::EngineConfig;
use crate::http::HttpClient;
use crate::models::{Query, QueryContext, ResourceId, Resources};

pub mod chain;
pub mod executor;
pub mod request;
pub mod response;

pub use executor::Executor;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("query timed out")]
    QueryTimedOut,

    #[error("cycle detected in chained parameters involving resource {0}")]
    CyclicChain(String),
}

/// Orchestrates a whole query: statements are topologically sorted into
/// waves by their chained-param dependencies, each wave runs concurrently,
/// and the whole run is bounded by the query deadline.
pub struct Runner {
    executor: Executor,
    global_timeout: Duration,
}

impl Runner {
    pub fn new(client: Arc<dyn HttpClient>, config: &EngineConfig) -> Self {
        Runner {
            executor: Executor::new(
                client,
                config.resource_timeout(),
                config.global_timeout(),
                config.forward_prefix.clone(),
            ),
            global_timeout: config.global_timeout(),
        }
    }

    pub async fn execute_query(
        &self,
        query: &Query,
        query_ctx: &QueryContext,
    ) -> Result<Resources, RunnerError> {
        let waves = waves_of(query)?;
        let deadline = query_ctx
            .options
            .global_timeout
            .unwrap_or(self.global_timeout);

        tokio::time::timeout(deadline, self.run_waves(query, query_ctx, waves))
            .await
            .map_err(|_| RunnerError::QueryTimedOut)
    }

    async fn run_waves(
        &self,
        query: &Query,
        query_ctx: &QueryContext,
        waves: Vec<Vec<usize>>,
    ) -> Resources {
        let mut resources = Resources::new();

        for (index, wave) in waves.into_iter().enumerate() {
            debug!(wave = index, statements = wave.len(), "executing wave");

            let wave_results = join_all(wave.into_iter().map(|position| {
                let statement = &query.statements[position];
                let snapshot = &resources;
                async move {
                    let tree = chain::resolve_statement(statement, snapshot);
                    let result = self.executor.do_statement_tree(&tree, query_ctx).await;
                    (ResourceId::of(statement), result)
                }
            }))
            .await;

            for (id, result) in wave_results {
                resources.insert(id, result);
            }
        }

        resources
    }
}

/// Groups statement indices into dependency waves: wave k holds every
/// statement whose chained dependencies were all resolved by wave k-1.
/// References to resources outside the query resolve to the empty-chain
/// sentinel at run time and are not dependencies.
fn waves_of(query: &Query) -> Result<Vec<Vec<usize>>, RunnerError> {
    let ids: Vec<ResourceId> = query.statements.iter().map(ResourceId::of).collect();
    let positions: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(position, id)| (id.0.as_str(), position))
        .collect();

    let dependencies: Vec<HashSet<usize>> = query
        .statements
        .iter()
        .map(|statement| {
            statement
                .chained_dependencies()
                .into_iter()
                .filter_map(|resource| positions.get(resource).copied())
                .collect()
        })
        .collect();

    let mut waves = Vec::new();
    let mut done: HashSet<usize> = HashSet::new();
    let mut remaining: Vec<usize> = (0..query.statements.len()).collect();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining
            .into_iter()
            .partition(|&position| dependencies[position].is_subset(&done));

        if ready.is_empty() {
            let stuck = blocked[0];
            return Err(RunnerError::CyclicChain(ids[stuck].0.clone()));
        }

        done.extend(ready.iter().copied());
        waves.push(ready);
        remaining = blocked;
    }

    Ok(waves)
}

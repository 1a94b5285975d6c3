//! Query-federation engine core.
//!
//! Evaluates declarative queries that describe several HTTP resources:
//! statements are resolved concurrently (fanning out over list-shaped
//! chained inputs), values flow between statements through chained params,
//! and the aggregated outcome is shaped by projection (`only`), match
//! filtering and visibility (`hidden`) clauses.

// Core data model and configuration
pub mod config;
pub mod mappings;
pub mod models;

// Query evaluation pipeline
pub mod aggregators;
pub mod evaluator;
pub mod filters;
pub mod match_cache;
pub mod match_evaluator;
pub mod runner;

// Transport and extension seams
pub mod http;
pub mod logging;
pub mod plugins;

// Re-export the types most embedders touch
pub use config::{ClientConfig, EngineConfig};
pub use evaluator::{EvalError, Evaluator, Parser, QueryReader, QueryReaderError, ValidationError};
pub use http::{HttpClient, HttpError, ReqwestHttpClient};
pub use mappings::{Database, EnvSource, Mapping, MappingError, MappingsReader, SystemEnv};
pub use match_cache::CachedMatchEvaluator;
pub use match_evaluator::{DefaultMatchEvaluator, MatchEvaluator};
pub use models::{
    DoneResource, Query, QueryContext, QueryInput, QueryOptions, ResourceId, ResourceResult,
    Resources, Statement,
};
pub use plugins::{HookContext, LifecycleHooks, PluginRegistry};
pub use runner::{Runner, RunnerError};

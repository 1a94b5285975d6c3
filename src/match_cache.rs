use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::match_evaluator::{stringify, MatchError, MatchEvaluator};
use crate::models::MatchArg;

/// Cache key for match outcomes. Keyed by the pattern source, never by
/// compiled-regex identity, so identical patterns share entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchValueKey {
    pattern: String,
    value: String,
}

/// Caching decorator over a [`MatchEvaluator`]: a bounded LRU of compiled
/// regexes keyed by pattern source, and a bounded LRU of match outcomes
/// keyed by pattern source plus stringified value.
///
/// Misses always hit the wrapped evaluator; compile errors are returned but
/// never cached. A poisoned cache lock degrades to the wrapped evaluator
/// instead of failing the query.
pub struct CachedMatchEvaluator<E> {
    inner: E,
    parse_arg_cache: Mutex<LruCache<String, Regex>>,
    match_value_cache: Mutex<LruCache<MatchValueKey, bool>>,
}

impl<E: MatchEvaluator> CachedMatchEvaluator<E> {
    pub fn new(inner: E, parse_arg_capacity: usize, match_value_capacity: usize) -> Self {
        CachedMatchEvaluator {
            inner,
            parse_arg_cache: Mutex::new(LruCache::new(capacity_of(parse_arg_capacity))),
            match_value_cache: Mutex::new(LruCache::new(capacity_of(match_value_capacity))),
        }
    }
}

impl CachedMatchEvaluator<crate::match_evaluator::DefaultMatchEvaluator> {
    /// The default evaluator behind caches sized from the engine config.
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        CachedMatchEvaluator::new(
            crate::match_evaluator::DefaultMatchEvaluator,
            config.parse_arg_cache_size,
            config.match_value_cache_size,
        )
    }
}

fn capacity_of(requested: usize) -> NonZeroUsize {
    NonZeroUsize::new(requested).unwrap_or(NonZeroUsize::MIN)
}

impl<E: MatchEvaluator> MatchEvaluator for CachedMatchEvaluator<E> {
    fn parse_arg(&self, arg: &MatchArg) -> Result<Regex, MatchError> {
        let source = match arg {
            // Already compiled, nothing to memoise.
            MatchArg::Compiled(regex) => return Ok(regex.clone()),
            MatchArg::Pattern(source) => source,
        };

        let mut cache = match self.parse_arg_cache.lock() {
            Ok(cache) => cache,
            Err(_) => {
                warn!("match parse cache unavailable, falling back to evaluator");
                return self.inner.parse_arg(arg);
            }
        };

        if let Some(regex) = cache.get(source) {
            return Ok(regex.clone());
        }

        let regex = self.inner.parse_arg(arg)?;
        cache.put(source.clone(), regex.clone());
        Ok(regex)
    }

    fn match_value(&self, regex: &Regex, value: &Value) -> bool {
        let key = MatchValueKey {
            pattern: regex.as_str().to_string(),
            value: stringify(value),
        };

        let mut cache = match self.match_value_cache.lock() {
            Ok(cache) => cache,
            Err(_) => {
                warn!("match value cache unavailable, falling back to evaluator");
                return self.inner.match_value(regex, value);
            }
        };

        if let Some(matched) = cache.get(&key) {
            return *matched;
        }

        let matched = self.inner.match_value(regex, value);
        cache.put(key, matched);
        matched
    }
}

//! ArgmaxQueryExecutor: the top-k completion query surface (spec §4.7).
//! Interface-only — estimators are supplied by the caller as opaque scoring
//! closures; the core never interprets counts itself.

use crate::cache::Cache;
use crate::pattern::Pattern;
use crate::store::CountRecord;

/// One ranked result: a completed sequence and the probability an
/// estimator assigned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCompletion {
    pub sequence: String,
    pub probability: f64,
}

/// Runs top-k completion queries against one completion-trie [`Cache`]
/// backing. Estimators are "deterministic pure functions of the Cache
/// contents" (spec §4.7): callers pass a closure from `(sequence, count
/// record)` to a probability, and the executor does nothing but rank.
pub struct ArgmaxQueryExecutor<'a> {
    cache: &'a Cache,
    pattern: Pattern,
}

impl<'a> ArgmaxQueryExecutor<'a> {
    pub fn new(cache: &'a Cache, pattern: Pattern) -> ArgmaxQueryExecutor<'a> {
        ArgmaxQueryExecutor { cache, pattern }
    }

    /// `queryArgmax(history, [prefix], k)`: the top `k` completions of
    /// `history` (optionally narrowed by `prefix`), ranked by
    /// non-increasing probability under `estimator` (spec §4.7, §8
    /// scenario 4).
    pub fn query_argmax(
        &self,
        history: &str,
        prefix: Option<&str>,
        k: usize,
        estimator: &dyn Fn(&str, CountRecord) -> f64,
    ) -> Vec<ScoredCompletion> {
        let search_prefix = match prefix {
            Some(p) if !p.is_empty() => format!("{} {}", history, p),
            _ => history.to_string(),
        };
        self.cache
            .completions(&self.pattern, &search_prefix, estimator, k)
            .into_iter()
            .map(|(sequence, record)| ScoredCompletion { sequence, probability: estimator(&sequence, record) })
            .collect()
    }
}

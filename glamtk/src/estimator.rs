//! Estimator formulae: out of the core's scope by design (spec §1, §4.7
//! "estimators are opaque to the core"), implemented here as the CLI's own
//! external collaborator. Each [`EstimatorKind`] declares the patterns it
//! needs (spec §4.5 step 1, "union of what the configured estimators
//! declare") and supplies a scoring closure the core's
//! `ArgmaxQueryExecutor`/`Cache::completions` treat as an opaque function of
//! the Cache contents.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;

use glamtk_core::cache::Cache;
use glamtk_core::pattern::PatternElem;
use glamtk_core::store::CountRecord;
use glamtk_core::Pattern;

/// One of the estimator families named in spec §2 OVERVIEW.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    /// Plain maximum likelihood, no smoothing.
    Mle,
    /// Interpolated Kneser-Ney, single discount.
    KneserNey,
    /// Interpolated Kneser-Ney with Chen & Goodman's three count-bucket
    /// discounts (D1, D2, D3+) estimated from the count-of-counts
    /// distribution of each backoff level's own store.
    ModifiedKneserNey,
    /// A simplified Generalized Language Model: averages the standard
    /// leftmost-drop Kneser-Ney backoff with any single-position-skip
    /// absolute counts observed at the top context level. The source
    /// GLM's full recursive skip lattice is a formula, not a core
    /// concern (spec §1); this is a representative, not exhaustive,
    /// stand-in for it.
    GeneralizedLanguageModel,
}

impl EstimatorKind {
    pub fn parse(s: &str) -> Result<EstimatorKind, String> {
        match s {
            "mle" => Ok(EstimatorKind::Mle),
            "kn" => Ok(EstimatorKind::KneserNey),
            "mkn" => Ok(EstimatorKind::ModifiedKneserNey),
            "glm" => Ok(EstimatorKind::GeneralizedLanguageModel),
            other => Err(format!("unknown estimator '{}' (expected mle, kn, mkn or glm)", other)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EstimatorKind::Mle => "mle",
            EstimatorKind::KneserNey => "kn",
            EstimatorKind::ModifiedKneserNey => "mkn",
            EstimatorKind::GeneralizedLanguageModel => "glm",
        }
    }
}

impl TryFrom<&str> for EstimatorKind {
    type Error = String;

    fn try_from(s: &str) -> Result<EstimatorKind, String> {
        EstimatorKind::parse(s)
    }
}

fn cnt_pattern(len: usize) -> Pattern {
    Pattern::new(vec![PatternElem::Cnt; len.max(1)]).expect("non-empty pattern")
}

/// `[Cnt; hist_len, Wskp]`: the continuation pattern whose `n1_plus` field
/// at key `"<history> %"` gives N1+(history·), the number of distinct words
/// observed following `history` (spec §4.4/§4.6, used for the KN
/// interpolation weight rather than the backoff chain itself).
fn trailing_wildcard_pattern(hist_len: usize) -> Pattern {
    let mut elems = vec![PatternElem::Cnt; hist_len];
    elems.push(PatternElem::Wskp);
    Pattern::new(elems).expect("non-empty pattern")
}

/// `[Wskp, Cnt]`: the bigram-level continuation pattern used as the base
/// case of every interpolated backoff chain regardless of training order
/// (the standard Kneser-Ney choice of always marginalising the deepest
/// backoff level over bigram contexts).
fn bigram_continuation_pattern() -> Pattern {
    Pattern::new(vec![PatternElem::Wskp, PatternElem::Cnt]).expect("non-empty pattern")
}

/// A length-`len` absolute pattern with a literal skip at `pos`.
fn skip_at(len: usize, pos: usize) -> Pattern {
    let mut elems = vec![PatternElem::Cnt; len.max(1)];
    if pos < elems.len() {
        elems[pos] = PatternElem::Skp;
    }
    Pattern::new(elems).expect("non-empty pattern")
}

/// The union of patterns every estimator in `kinds` needs at `order`
/// (spec §4.5 step 1). Deduplicated by label.
pub fn required_patterns_for(kinds: &[EstimatorKind], order: usize) -> Vec<Pattern> {
    let needs_smoothing = kinds.iter().any(|k| *k != EstimatorKind::Mle);
    let order = if needs_smoothing { order.max(2) } else { order.max(1) };
    let mut seen: HashSet<String> = HashSet::new();
    let mut patterns: Vec<Pattern> = Vec::new();
    let mut push = |p: Pattern, patterns: &mut Vec<Pattern>, seen: &mut HashSet<String>| {
        if seen.insert(p.label()) {
            patterns.push(p);
        }
    };

    for k in 1..=order {
        push(cnt_pattern(k), &mut patterns, &mut seen);
    }

    if needs_smoothing {
        for n in 1..order {
            push(trailing_wildcard_pattern(n), &mut patterns, &mut seen);
        }
        push(bigram_continuation_pattern(), &mut patterns, &mut seen);
    }

    if kinds.contains(&EstimatorKind::GeneralizedLanguageModel) {
        let n = order - 1;
        for pos in 0..n {
            push(skip_at(order, pos), &mut patterns, &mut seen);
            push(skip_at(n, pos), &mut patterns, &mut seen);
        }
    }

    patterns
}

/// A built estimator bound to one [`Cache`]: "a deterministic pure function
/// of the Cache contents" (spec §4.7). Memoizes the aggregate statistics
/// (total counts, count-of-counts) it derives from whole pattern stores so
/// repeated scoring calls during one completion query don't re-scan them.
pub struct Estimator<'a> {
    cache: &'a Cache,
    kind: EstimatorKind,
    order: usize,
    totals: RefCell<HashMap<usize, f64>>,
    counts_of_counts: RefCell<HashMap<String, (f64, f64, f64, f64)>>,
}

impl<'a> Estimator<'a> {
    pub fn new(cache: &'a Cache, kind: EstimatorKind, order: usize) -> Estimator<'a> {
        Estimator {
            cache,
            kind,
            order: order.max(2),
            totals: RefCell::new(HashMap::new()),
            counts_of_counts: RefCell::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    /// `P(word | history_tokens)`, `history_tokens` ordered oldest-first.
    pub fn probability(&self, history_tokens: &[&str], word: &str) -> f64 {
        match self.kind {
            EstimatorKind::Mle => self.mle(history_tokens, word),
            EstimatorKind::KneserNey => self.kn(history_tokens, word, false),
            EstimatorKind::ModifiedKneserNey => self.kn(history_tokens, word, true),
            EstimatorKind::GeneralizedLanguageModel => self.glm(history_tokens, word),
        }
    }

    /// A scoring closure for `Cache::completions`/`ArgmaxQueryExecutor`: the
    /// trie stores full `"<history> <word>"` sequences, so the closure
    /// splits off the trailing word and delegates to [`Estimator::probability`].
    pub fn score_fn<'b>(&'b self, history_tokens: Vec<String>) -> impl Fn(&str, CountRecord) -> f64 + 'b {
        move |sequence: &str, _record: CountRecord| {
            let word = sequence.rsplit(' ').next().unwrap_or(sequence);
            let refs: Vec<&str> = history_tokens.iter().map(|s| s.as_str()).collect();
            self.probability(&refs, word)
        }
    }

    fn absolute_count(&self, pattern: &Pattern, key: &str) -> f64 {
        match self.cache.get(pattern, key) {
            Some(CountRecord::Absolute(c)) => c as f64,
            _ => 0.0,
        }
    }

    fn continuation_record(&self, pattern: &Pattern, key: &str) -> (f64, f64, f64, f64) {
        match self.cache.get(pattern, key) {
            Some(CountRecord::Continuation { n1_plus, n1, n2, n3_plus }) => {
                (n1_plus as f64, n1 as f64, n2 as f64, n3_plus as f64)
            }
            _ => (0.0, 0.0, 0.0, 0.0),
        }
    }

    /// Sum of every absolute count stored under the length-`len` pattern;
    /// the unigram-level normaliser for plain MLE.
    fn total_count(&self, len: usize) -> f64 {
        if let Some(v) = self.totals.borrow().get(&len) {
            return *v;
        }
        let pattern = cnt_pattern(len);
        let total: f64 = self
            .cache
            .records(&pattern)
            .map(|(_, r)| match r {
                CountRecord::Absolute(c) => c as f64,
                CountRecord::Continuation { .. } => 0.0,
            })
            .sum();
        self.totals.borrow_mut().insert(len, total);
        total
    }

    /// Chen & Goodman count-of-counts `(n1, n2, n3, n4+)` for every absolute
    /// count observed under `pattern`, memoized per pattern label.
    fn count_of_counts(&self, pattern: &Pattern) -> (f64, f64, f64, f64) {
        let label = pattern.label();
        if let Some(v) = self.counts_of_counts.borrow().get(&label) {
            return *v;
        }
        let (mut n1, mut n2, mut n3, mut n4) = (0.0, 0.0, 0.0, 0.0);
        for (_, record) in self.cache.records(pattern) {
            if let CountRecord::Absolute(c) = record {
                match c {
                    1 => n1 += 1.0,
                    2 => n2 += 1.0,
                    3 => n3 += 1.0,
                    c if c >= 4 => n4 += 1.0,
                    _ => {}
                }
            }
        }
        let v = (n1, n2, n3, n4);
        self.counts_of_counts.borrow_mut().insert(label, v);
        v
    }

    fn mle(&self, history: &[&str], word: &str) -> f64 {
        if history.is_empty() {
            let total = self.total_count(1);
            if total <= 0.0 {
                return 0.0;
            }
            return self.absolute_count(&cnt_pattern(1), word) / total;
        }
        let hist_key = history.join(" ");
        let full_key = format!("{} {}", hist_key, word);
        let c_h = self.absolute_count(&cnt_pattern(history.len()), &hist_key);
        if c_h <= 0.0 {
            return 0.0;
        }
        self.absolute_count(&cnt_pattern(history.len() + 1), &full_key) / c_h
    }

    /// P_cont(word): the interpolated backoff base case, always computed
    /// from bigram continuation counts regardless of `order` (standard
    /// Kneser-Ney practice).
    fn continuation_unigram(&self, word: &str) -> f64 {
        let pattern = bigram_continuation_pattern();
        let key = format!("% {}", word);
        let (n1_plus_w, ..) = self.continuation_record(&pattern, &key);
        let total = self.cache.len(&cnt_pattern(2)).max(1) as f64;
        n1_plus_w / total
    }

    fn discount(&self, modified: bool, pattern: &Pattern, c: f64) -> f64 {
        if c <= 0.0 {
            return 0.0;
        }
        if !modified {
            return 0.75f64.min(c);
        }
        let (n1, n2, n3, n4) = self.count_of_counts(pattern);
        if n1 + n2 <= 0.0 {
            return 0.75f64.min(c);
        }
        let y = n1 / (n1 + 2.0 * n2);
        let d1 = (1.0 - 2.0 * y * (n2 / n1.max(1.0))).max(0.0);
        let d2 = (2.0 - 3.0 * y * (n3 / n2.max(1.0))).max(0.0);
        let d3 = (3.0 - 4.0 * y * (n4 / n3.max(1.0))).max(0.0);
        let d = if (c - 1.0).abs() < 1e-9 {
            d1
        } else if (c - 2.0).abs() < 1e-9 {
            d2
        } else {
            d3
        };
        d.min(c)
    }

    /// Interpolated Kneser-Ney (spec glossary "Continuation count"/"N1+"),
    /// dropping the leftmost (most distant) history word at each backoff
    /// level, per the patterns `derive_continuation_family` projects.
    fn kn(&self, history: &[&str], word: &str, modified: bool) -> f64 {
        if history.is_empty() {
            return self.continuation_unigram(word);
        }
        let n = history.len();
        let hist_pattern = cnt_pattern(n);
        let hist_key = history.join(" ");
        let c_h = self.absolute_count(&hist_pattern, &hist_key);
        if c_h <= 0.0 {
            return self.kn(&history[1..], word, modified);
        }
        let full_pattern = cnt_pattern(n + 1);
        let full_key = format!("{} {}", hist_key, word);
        let c_hw = self.absolute_count(&full_pattern, &full_key);

        let wildcard_pattern = trailing_wildcard_pattern(n);
        let wildcard_key = format!("{} %", hist_key);
        let (n1_plus_h, ..) = self.continuation_record(&wildcard_pattern, &wildcard_key);

        let d = self.discount(modified, &full_pattern, c_hw);
        let lambda = (d * n1_plus_h) / c_h;
        let backoff = self.kn(&history[1..], word, modified);
        ((c_hw - d).max(0.0) / c_h) + lambda * backoff
    }

    /// Averages the standard Kneser-Ney estimate with any single-position
    /// skip-pattern ratios observed at the top context level (see the type
    /// doc for the scope of this simplification).
    fn glm(&self, history: &[&str], word: &str) -> f64 {
        if history.is_empty() {
            return self.continuation_unigram(word);
        }
        let n = history.len();
        let mut estimates = vec![self.kn(history, word, false)];

        if n == self.order - 1 {
            for pos in 0..n {
                let mut hist_key_parts: Vec<String> = history.iter().map(|s| s.to_string()).collect();
                hist_key_parts[pos] = "_".to_string();
                let hist_key = hist_key_parts.join(" ");
                let full_key = format!("{} {}", hist_key, word);

                let skip_hist = skip_at(n, pos);
                let skip_full = skip_at(n + 1, pos);
                let c_h = self.absolute_count(&skip_hist, &hist_key);
                if c_h > 0.0 {
                    let c_hw = self.absolute_count(&skip_full, &full_key);
                    estimates.push(c_hw / c_h);
                }
            }
        }

        estimates.iter().sum::<f64>() / estimates.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glamtk_core::aggregator::{aggregate_absolute, aggregate_continuation, AggregatorConfig};
    use glamtk_core::cache::CacheSpecification;
    use glamtk_core::index::WordIndex;
    use glamtk_core::sequencer::{Sequencer, SequencerConfig};
    use glamtk_core::store::PatternStore;
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::tempdir;

    fn build_store(dir: &Path, corpus: &str, patterns: Vec<Pattern>) -> WordIndex {
        let index = WordIndex::build(Cursor::new(corpus), 2, Path::new("corpus")).unwrap();
        let mut by_len: HashMap<usize, Vec<Pattern>> = HashMap::new();
        for p in &patterns {
            by_len.entry(p.len()).or_default().push(p.clone());
        }
        for (_, group) in by_len {
            let seq = Sequencer::new(&index, group, dir, SequencerConfig::default()).unwrap();
            seq.run(Cursor::new(corpus), Path::new("corpus")).unwrap();
        }
        for p in &patterns {
            let store = PatternStore::new(dir, p.clone());
            if p.is_absolute() {
                for bucket in 0..index.n_buckets() {
                    aggregate_absolute(&store.split_path(bucket), &store.chunk_path(bucket), &AggregatorConfig::default())
                        .unwrap();
                }
            } else {
                aggregate_continuation(p, dir, &index).unwrap();
            }
        }
        index
    }

    #[test]
    fn mle_matches_scenario_one() {
        let dir = tempdir().unwrap();
        let corpus = "a b a b a";
        let patterns = required_patterns_for(&[EstimatorKind::Mle], 2);
        let index = build_store(dir.path(), corpus, patterns.clone());
        let spec = CacheSpecification { hash_patterns: patterns, trie_patterns: vec![] };
        let cache = Cache::build(dir.path(), &index, &spec).unwrap();
        let estimator = Estimator::new(&cache, EstimatorKind::Mle, 2);
        // c("a b")=2, c("a")=3 => P(b|a) = 2/3
        assert!((estimator.probability(&["a"], "b") - (2.0 / 3.0)).abs() < 1e-9);
        // unigram: c("a")=3 over 5 tokens
        assert!((estimator.probability(&[], "a") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn kneser_ney_is_a_probability_like_value() {
        let dir = tempdir().unwrap();
        let corpus = "a b c\na b d\nb c d\n";
        let patterns = required_patterns_for(&[EstimatorKind::KneserNey], 3);
        let index = build_store(dir.path(), corpus, patterns.clone());
        let spec = CacheSpecification { hash_patterns: patterns, trie_patterns: vec![] };
        let cache = Cache::build(dir.path(), &index, &spec).unwrap();
        let estimator = Estimator::new(&cache, EstimatorKind::KneserNey, 3);
        let p = estimator.probability(&["a", "b"], "c");
        assert!(p >= 0.0);
        let p_unseen = estimator.probability(&["a", "b"], "zzz");
        assert!(p_unseen >= 0.0);
    }

    #[test]
    fn unknown_estimator_label_rejected() {
        assert!(EstimatorKind::parse("bogus").is_err());
        assert_eq!(EstimatorKind::parse("mkn").unwrap(), EstimatorKind::ModifiedKneserNey);
    }
}

//! Cache: an in-memory, read-only view of a chosen subset of Pattern
//! stores (spec §4.6). Two interchangeable backings share one contract:
//! hash-map point lookup, and completion-trie point lookup plus
//! prefix-ordered enumeration.

use std::path::Path;

use fnv::FnvHashMap;

use crate::error::GlamtkError;
use crate::index::WordIndex;
use crate::pattern::Pattern;
use crate::store::{read_chunk, CountRecord, PatternStore};

/// Which patterns to load, and into which backing. A pattern named in both
/// lists is loaded twice, once per backing.
#[derive(Debug, Clone, Default)]
pub struct CacheSpecification {
    pub hash_patterns: Vec<Pattern>,
    pub trie_patterns: Vec<Pattern>,
}

/// One node of the completion trie: a token edge map plus an optional
/// record marking this node as a full stored sequence.
#[derive(Default)]
struct TrieNode {
    children: FnvHashMap<String, TrieNode>,
    record: Option<CountRecord>,
}

/// A from-scratch node-arena trie over space-joined pattern keys, built by
/// streaming every bucket chunk of one pattern into token-indexed edges.
struct Trie {
    root: TrieNode,
}

impl Trie {
    fn new() -> Trie {
        Trie { root: TrieNode::default() }
    }

    fn insert(&mut self, sequence: &str, record: CountRecord) {
        let mut node = &mut self.root;
        for token in sequence.split(' ') {
            node = node.children.entry(token.to_string()).or_default();
        }
        node.record = Some(record);
    }

    /// Walk `prefix_tokens` down the trie; `None` if the prefix is absent.
    fn descend<'a>(&'a self, prefix_tokens: &[&str]) -> Option<&'a TrieNode> {
        let mut node = &self.root;
        for token in prefix_tokens {
            node = node.children.get(*token)?;
        }
        Some(node)
    }

    /// Enumerate every full sequence reachable under `node`, prefixed by
    /// `prefix`, into `out`.
    fn collect(node: &TrieNode, prefix: &[&str], out: &mut Vec<(String, CountRecord)>) {
        if let Some(record) = node.record {
            out.push((prefix.join(" "), record));
        }
        for (token, child) in &node.children {
            let mut extended: Vec<&str> = prefix.to_vec();
            extended.push(token.as_str());
            Self::collect(child, &extended, out);
        }
    }
}

/// An in-memory view of selected Pattern stores (spec §4.6). Built fresh
/// per run or per query-file sub-cache; immutable once built.
pub struct Cache {
    maps: FnvHashMap<String, FnvHashMap<String, CountRecord>>,
    tries: FnvHashMap<String, Trie>,
}

impl Cache {
    /// Load exactly the artefacts named by `spec` from the Pattern stores
    /// under `working_dir`. A pattern with no chunks on disk yet (e.g. one
    /// the driver has not built) loads as empty rather than erroring, so a
    /// partially-built store can still answer queries for what exists.
    pub fn build(
        working_dir: &Path,
        index: &WordIndex,
        spec: &CacheSpecification,
    ) -> Result<Cache, GlamtkError> {
        let mut maps = FnvHashMap::default();
        for pattern in &spec.hash_patterns {
            let store = PatternStore::new(working_dir, pattern.clone());
            let mut map = FnvHashMap::default();
            for bucket in 0..index.n_buckets() {
                let chunk_path = store.chunk_path(bucket);
                if !chunk_path.exists() {
                    continue;
                }
                for (seq, record) in read_chunk(&chunk_path)? {
                    map.insert(seq, record);
                }
            }
            maps.insert(pattern.label(), map);
        }

        let mut tries = FnvHashMap::default();
        for pattern in &spec.trie_patterns {
            let store = PatternStore::new(working_dir, pattern.clone());
            let mut trie = Trie::new();
            for bucket in 0..index.n_buckets() {
                let chunk_path = store.chunk_path(bucket);
                if !chunk_path.exists() {
                    continue;
                }
                for (seq, record) in read_chunk(&chunk_path)? {
                    trie.insert(&seq, record);
                }
            }
            tries.insert(pattern.label(), trie);
        }

        Ok(Cache { maps, tries })
    }

    /// Point lookup against the hash-map backing.
    pub fn get(&self, pattern: &Pattern, sequence: &str) -> Option<CountRecord> {
        self.maps.get(&pattern.label())?.get(sequence).copied()
    }

    /// The full observed vocabulary, if the absolute unigram pattern `"c"`
    /// was loaded into the hash-map backing (its keys are exactly the
    /// vocabulary; spec §4.6's optional `words()` capability).
    pub fn words(&self) -> Option<impl Iterator<Item = &str>> {
        self.maps.get("c").map(|m| m.keys().map(|k| k.as_str()))
    }

    /// Number of distinct keys loaded for `pattern` in the hash-map
    /// backing, or 0 if it was not loaded. Lets a caller (an estimator)
    /// compute aggregate statistics over a whole pattern store, such as
    /// the total continuation mass or a discount estimated from the
    /// count-of-counts distribution, without re-reading chunk files.
    pub fn len(&self, pattern: &Pattern) -> usize {
        self.maps.get(&pattern.label()).map(|m| m.len()).unwrap_or(0)
    }

    /// Every `(sequence, record)` pair loaded for `pattern` in the
    /// hash-map backing. Empty iterator if the pattern was not loaded.
    pub fn records(&self, pattern: &Pattern) -> impl Iterator<Item = (&str, CountRecord)> {
        self.maps.get(&pattern.label()).into_iter().flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Up to `k` completions of `history_prefix` under `pattern`, ordered by
    /// non-increasing `score_fn(sequence, count)`, ties broken by
    /// lexicographic order of the completion (spec §4.6, §8 scenario 4).
    /// `history_prefix` is a space-joined prefix of tokens; the empty
    /// string matches every stored sequence. Each returned string is only
    /// the portion of the stored sequence after `history_prefix` (spec §8
    /// scenario 4: `queryArgmax(history="a", k=2)` returns `[("b", p1)]`,
    /// not `[("a b", p1)]`).
    pub fn completions(
        &self,
        pattern: &Pattern,
        history_prefix: &str,
        score_fn: &dyn Fn(&str, CountRecord) -> f64,
        k: usize,
    ) -> Vec<(String, CountRecord)> {
        let trie = match self.tries.get(&pattern.label()) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let prefix_tokens: Vec<&str> = if history_prefix.is_empty() {
            Vec::new()
        } else {
            history_prefix.split(' ').collect()
        };
        let node = match trie.descend(&prefix_tokens) {
            Some(n) => n,
            None => return Vec::new(),
        };

        let mut matches = Vec::new();
        Trie::collect(node, &prefix_tokens, &mut matches);

        // Exhaustive enumerate-then-sort rather than a bounded best-first
        // heap walk: simpler and still exactly satisfies the ordering
        // contract, since a query-sub-cache holds only the sequences one
        // query file actually asks about (spec §6 queryCache).
        let mut scored: Vec<(OrderedFloat, String, CountRecord)> = matches
            .into_iter()
            .map(|(seq, record)| (OrderedFloat(score_fn(&seq, record)), seq, record))
            .collect();
        // Score descending, completion ascending: compare score first with
        // the sides swapped, then fall back to plain lexicographic order
        // on the tied sequences, so ties never depend on reversing the
        // whole ordering (which would flip the tie-break along with the
        // score).
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(k)
            .map(|(_, seq, record)| (strip_prefix(&seq, prefix_tokens.len()), record))
            .collect()
    }
}

/// Drops the first `n_tokens` space-separated tokens from `seq`, returning
/// only the completion that follows the matched prefix.
fn strip_prefix(seq: &str, n_tokens: usize) -> String {
    if n_tokens == 0 {
        return seq.to_string();
    }
    let mut rest = seq;
    for _ in 0..n_tokens {
        match rest.find(' ') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return String::new(),
        }
    }
    rest.to_string()
}

/// Total order over scores for the completion ranking: `sort_by` wants a
/// total order, and `f64` only implements `PartialOrd`. NaN scores sort as
/// the least preferred rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f64);

impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Less)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{Sequencer, SequencerConfig};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn build_unigram_and_bigram(dir: &Path) -> WordIndex {
        let corpus = "a b a b a";
        let index = WordIndex::build(Cursor::new(corpus), 2, Path::new("corpus")).unwrap();

        for label in ["c", "cc"] {
            let pattern = Pattern::parse(label).unwrap();
            let seq =
                Sequencer::new(&index, vec![pattern.clone()], dir, SequencerConfig::default()).unwrap();
            seq.run(Cursor::new(corpus), Path::new("corpus")).unwrap();
            let store = PatternStore::new(dir, pattern);
            for bucket in 0..index.n_buckets() {
                crate::aggregator::aggregate_absolute(
                    &store.split_path(bucket),
                    &store.chunk_path(bucket),
                    &crate::aggregator::AggregatorConfig::default(),
                )
                .unwrap();
            }
        }
        index
    }

    #[test]
    fn hash_backing_reads_through_to_stored_counts() {
        let dir = tempdir().unwrap();
        let index = build_unigram_and_bigram(dir.path());
        let spec = CacheSpecification {
            hash_patterns: vec![Pattern::parse("c").unwrap(), Pattern::parse("cc").unwrap()],
            trie_patterns: vec![],
        };
        let cache = Cache::build(dir.path(), &index, &spec).unwrap();
        let unigram = Pattern::parse("c").unwrap();
        assert_eq!(cache.get(&unigram, "a"), Some(CountRecord::Absolute(3)));
        assert_eq!(cache.get(&unigram, "b"), Some(CountRecord::Absolute(2)));

        let mut words: Vec<&str> = cache.words().unwrap().collect();
        words.sort();
        assert_eq!(words, vec!["a", "b"]);
    }

    #[test]
    fn argmax_scenario_single_observed_continuation() {
        let dir = tempdir().unwrap();
        let index = build_unigram_and_bigram(dir.path());
        let spec = CacheSpecification { hash_patterns: vec![], trie_patterns: vec![Pattern::parse("cc").unwrap()] };
        let cache = Cache::build(dir.path(), &index, &spec).unwrap();
        let bigram = Pattern::parse("cc").unwrap();

        let score = |_seq: &str, record: CountRecord| -> f64 {
            match record {
                CountRecord::Absolute(c) => c as f64,
                CountRecord::Continuation { .. } => 0.0,
            }
        };
        let top = cache.completions(&bigram, "a", &score, 2);
        assert_eq!(top, vec![("b".to_string(), CountRecord::Absolute(2))]);
    }

    #[test]
    fn completions_break_ties_lexicographically() {
        let dir = tempdir().unwrap();
        let corpus = "a c\na b\n";
        let index = WordIndex::build(Cursor::new(corpus), 2, Path::new("corpus")).unwrap();
        let bigram = Pattern::parse("cc").unwrap();
        let seq =
            Sequencer::new(&index, vec![bigram.clone()], dir.path(), SequencerConfig::default()).unwrap();
        seq.run(Cursor::new(corpus), Path::new("corpus")).unwrap();
        let store = PatternStore::new(dir.path(), bigram.clone());
        for bucket in 0..index.n_buckets() {
            crate::aggregator::aggregate_absolute(
                &store.split_path(bucket),
                &store.chunk_path(bucket),
                &crate::aggregator::AggregatorConfig::default(),
            )
            .unwrap();
        }
        let spec = CacheSpecification { hash_patterns: vec![], trie_patterns: vec![bigram.clone()] };
        let cache = Cache::build(dir.path(), &index, &spec).unwrap();

        // "a b" and "a c" are both observed once: equal score, so the
        // lexicographically smaller completion "b" must win, not "c"
        // (spec §4.6 "Ties broken by lexicographic order of the
        // completion").
        let score = |_seq: &str, record: CountRecord| -> f64 {
            match record {
                CountRecord::Absolute(c) => c as f64,
                CountRecord::Continuation { .. } => 0.0,
            }
        };
        let top1 = cache.completions(&bigram, "a", &score, 1);
        assert_eq!(top1, vec![("b".to_string(), CountRecord::Absolute(1))]);

        let top2 = cache.completions(&bigram, "a", &score, 2);
        assert_eq!(
            top2,
            vec![("b".to_string(), CountRecord::Absolute(1)), ("c".to_string(), CountRecord::Absolute(1))]
        );
    }
}

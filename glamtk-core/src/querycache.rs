//! Per-query sub-stores: `queryCache/<hash-of-query-file>/…` (spec §6),
//! populated only with sequences appearing in one query file (spec §4.5
//! "produces per-query sub-caches"; §4.6 "Cache: created fresh per run (or
//! per query file for query-sub-caches)").

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::GlamtkError;
use crate::index::{fnv1a64, WordIndex};
use crate::pattern::{Pattern, PatternElem};
use crate::store::{read_chunk, write_chunk, PatternStore};

/// Hash used to name a query file's sub-cache directory. Same FNV-1a 64-bit
/// hash as `WordIndex::bucket_of` (spec §9's documented stable hash),
/// applied to the raw file bytes rather than a word.
pub fn hash_query_bytes(bytes: &[u8]) -> String {
    format!("{:016x}", fnv1a64(bytes))
}

pub fn query_cache_root(working_dir: &Path, query_file_hash: &str) -> PathBuf {
    working_dir.join("queryCache").join(query_file_hash)
}

/// True for a literal, fully-counted pattern (all slots `Cnt`): its keys
/// are exactly observed word sequences, so "sequences appearing in the
/// query file" is well-defined as a key-prefix match against the query's
/// history (and every leftmost-drop backoff suffix of it, spec §4.4).
pub fn is_literal_cnt_pattern(pattern: &Pattern) -> bool {
    (0..pattern.len()).all(|i| pattern.element_at(i) == PatternElem::Cnt)
}

/// Build (or reuse, if already populated) a per-query sub-store for one
/// query file. `histories` is every query's history tokens (oldest-first);
/// for each one, every leftmost-drop suffix (including the empty history)
/// is treated as "appearing in the query file", matching the backoff chain
/// an interpolated estimator walks (spec §4.4 continuation family).
///
/// For each literal all-`Cnt` pattern in `patterns`, only chunk entries
/// whose sequence starts with one of those suffixes are copied. A pattern
/// with any `Skp`/`Wskp`/`Pos`/`Del`/`Wild` slot has no well-defined notion
/// of "the sequences this query file names" under the sequencer's
/// projection contract, so it is copied through unfiltered rather than
/// risk silently dropping an entry an estimator still needs.
pub fn build(
    working_dir: &Path,
    patterns: &[Pattern],
    index: &WordIndex,
    histories: &[Vec<String>],
    query_file_hash: &str,
) -> Result<PathBuf, GlamtkError> {
    let root = query_cache_root(working_dir, query_file_hash);

    let mut needed_prefixes: HashSet<Vec<String>> = HashSet::new();
    needed_prefixes.insert(Vec::new());
    for history in histories {
        for start in 0..history.len() {
            needed_prefixes.insert(history[start..].to_vec());
        }
    }

    for pattern in patterns {
        let src = PatternStore::new(working_dir, pattern.clone());
        let dst_dir = root.join(pattern.label());
        std::fs::create_dir_all(&dst_dir).map_err(|e| GlamtkError::io(&dst_dir, "create_dir_all", e))?;

        if !is_literal_cnt_pattern(pattern) {
            copy_store_unfiltered(&src, &dst_dir, index.n_buckets())?;
            continue;
        }

        for bucket in 0..index.n_buckets() {
            let chunk_path = src.chunk_path(bucket);
            if !chunk_path.exists() {
                continue;
            }
            let chunk = read_chunk(&chunk_path)?;
            let filtered: BTreeMap<_, _> = chunk
                .into_iter()
                .filter(|(seq, _)| sequence_matches_a_prefix(seq, &needed_prefixes))
                .collect();
            write_chunk(&dst_dir.join(bucket.to_string()), &filtered)?;
        }
    }

    Ok(root)
}

fn sequence_matches_a_prefix(seq: &str, needed_prefixes: &HashSet<Vec<String>>) -> bool {
    let words: Vec<&str> = seq.split(' ').collect();
    needed_prefixes
        .iter()
        .any(|prefix| prefix.len() < words.len() && prefix.iter().zip(&words).all(|(p, w)| p == w))
}

fn copy_store_unfiltered(src: &PatternStore, dst_dir: &Path, n_buckets: u32) -> Result<(), GlamtkError> {
    for bucket in 0..n_buckets {
        let chunk_path = src.chunk_path(bucket);
        if !chunk_path.exists() {
            continue;
        }
        std::fs::copy(&chunk_path, dst_dir.join(bucket.to_string()))
            .map_err(|e| GlamtkError::io(dst_dir, "copy", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{aggregate_absolute, AggregatorConfig};
    use crate::sequencer::{Sequencer, SequencerConfig};
    use crate::store::CountRecord;
    use std::io::Cursor;

    fn build_bigram_store(dir: &Path) -> WordIndex {
        let corpus = "the cat sat\nthe dog sat\n";
        let index = WordIndex::build(Cursor::new(corpus), 2, Path::new("corpus")).unwrap();
        let bigram = Pattern::parse("cc").unwrap();
        let seq = Sequencer::new(&index, vec![bigram.clone()], dir, SequencerConfig::default()).unwrap();
        seq.run(Cursor::new(corpus), Path::new("corpus")).unwrap();
        let store = PatternStore::new(dir, bigram);
        for bucket in 0..index.n_buckets() {
            aggregate_absolute(&store.split_path(bucket), &store.chunk_path(bucket), &AggregatorConfig::default())
                .unwrap();
        }
        index
    }

    #[test]
    fn sub_cache_keeps_only_matching_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_bigram_store(dir.path());
        let bigram = Pattern::parse("cc").unwrap();

        let histories = vec![vec!["the".to_string()]];
        let hash = hash_query_bytes(b"the\n");
        let root = build(dir.path(), &[bigram.clone()], &index, &histories, &hash).unwrap();

        let sub_store = PatternStore::new(&root, bigram);
        let mut merged = std::collections::BTreeMap::new();
        for bucket in 0..index.n_buckets() {
            if sub_store.chunk_path(bucket).exists() {
                merged.extend(crate::store::read_chunk(&sub_store.chunk_path(bucket)).unwrap());
            }
        }
        assert!(merged.contains_key("the cat"));
        assert!(merged.contains_key("the dog"));
        assert!(!merged.contains_key("cat sat"));
        assert!(matches!(merged.get("the cat"), Some(CountRecord::Absolute(1))));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_query_bytes(b"abc"), hash_query_bytes(b"abc"));
        assert_ne!(hash_query_bytes(b"abc"), hash_query_bytes(b"abd"));
    }
}

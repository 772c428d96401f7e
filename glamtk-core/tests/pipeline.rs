//! End-to-end pipeline-driver tests against a real temporary working
//! directory (spec §8: round-trip/idempotence properties and boundary
//! behaviours that span more than one module).

use std::fs;
use std::io::Cursor;

use glamtk_core::argmax::ArgmaxQueryExecutor;
use glamtk_core::cache::{Cache, CacheSpecification};
use glamtk_core::driver::{PipelineConfig, PipelineDriver};
use glamtk_core::index::WordIndex;
use glamtk_core::store::CountRecord;
use glamtk_core::{GlamtkError, Pattern};
use tempfile::tempdir;

fn write_corpus(dir: &std::path::Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("corpus.txt");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn rebuild_with_unchanged_corpus_is_byte_identical() {
    let dir = tempdir().unwrap();
    let corpus_path = write_corpus(dir.path(), "a b a b a\n");
    let work = dir.path().join("work");
    let driver = PipelineDriver::new(&work, PipelineConfig::default());
    let patterns = vec![Pattern::parse("c").unwrap(), Pattern::parse("cc").unwrap()];

    driver.run(&corpus_path, &patterns).unwrap();
    let snapshot: Vec<(std::path::PathBuf, Vec<u8>)> = walk_chunks(&work);

    // Re-run with the same corpus and WordIndex; every chunk file must be
    // byte-identical (spec invariant 6) and no stage should have redone
    // work it didn't need to (spec §4.5 idempotence / §8 round-trip).
    driver.run(&corpus_path, &patterns).unwrap();
    let rerun: Vec<(std::path::PathBuf, Vec<u8>)> = walk_chunks(&work);

    assert_eq!(snapshot, rerun);
}

fn walk_chunks(work: &std::path::Path) -> Vec<(std::path::PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    for label in ["c", "cc"] {
        let dir = work.join(label);
        if !dir.exists() {
            continue;
        }
        let mut entries: Vec<_> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().path()).collect();
        entries.sort();
        for path in entries {
            out.push((path.clone(), fs::read(&path).unwrap()));
        }
    }
    out
}

#[test]
fn naive_counter_matches_pipeline_counts() {
    let dir = tempdir().unwrap();
    let corpus = "the cat sat on the mat\nthe dog sat on the rug\n";
    let corpus_path = write_corpus(dir.path(), corpus);
    let work = dir.path().join("work");
    let driver = PipelineDriver::new(&work, PipelineConfig::default());
    let bigram = Pattern::parse("cc").unwrap();
    let index = driver.run(&corpus_path, std::slice::from_ref(&bigram)).unwrap();

    let spec = CacheSpecification { hash_patterns: vec![bigram.clone()], trie_patterns: vec![] };
    let cache = Cache::build(&work, &index, &spec).unwrap();

    // Reference: naive single-pass bigram counter.
    let mut naive: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for line in corpus.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for w in tokens.windows(2) {
            *naive.entry(format!("{} {}", w[0], w[1])).or_insert(0) += 1;
        }
    }

    for (seq, count) in &naive {
        assert_eq!(cache.get(&bigram, seq), Some(CountRecord::Absolute(*count)));
    }
}

#[test]
fn empty_corpus_produces_no_chunks_and_no_error() {
    let dir = tempdir().unwrap();
    let corpus_path = write_corpus(dir.path(), "");
    let work = dir.path().join("work");
    let driver = PipelineDriver::new(&work, PipelineConfig::default());
    let patterns = vec![Pattern::parse("c").unwrap()];
    let index = driver.run(&corpus_path, &patterns).unwrap();

    assert_eq!(index.vocab_size(), 0);
    let stats_path = work.join("stats.txt");
    assert!(stats_path.exists());
}

#[test]
fn reserved_symbol_in_corpus_aborts_with_line_number() {
    let dir = tempdir().unwrap();
    let corpus_path = write_corpus(dir.path(), "a b c\na _bad_ c\n");
    let work = dir.path().join("work");
    let driver = PipelineDriver::new(&work, PipelineConfig::default());
    let patterns = vec![Pattern::parse("c").unwrap()];
    let err = driver.run(&corpus_path, &patterns).unwrap_err();
    match err {
        GlamtkError::FileFormat { line, .. } => assert_eq!(line, 2),
        other => panic!("expected FileFormat error, got {:?}", other),
    }
}

#[test]
fn end_to_end_argmax_over_built_store() {
    let dir = tempdir().unwrap();
    let corpus_path = write_corpus(dir.path(), "a b a b a\n");
    let work = dir.path().join("work");
    let driver = PipelineDriver::new(&work, PipelineConfig::default());
    let bigram = Pattern::parse("cc").unwrap();
    let index = driver.run(&corpus_path, std::slice::from_ref(&bigram)).unwrap();

    let spec = CacheSpecification { hash_patterns: vec![], trie_patterns: vec![bigram.clone()] };
    let cache = Cache::build(&work, &index, &spec).unwrap();
    let executor = ArgmaxQueryExecutor::new(&cache, bigram);

    let score = |_seq: &str, record: CountRecord| -> f64 {
        match record {
            CountRecord::Absolute(c) => c as f64,
            CountRecord::Continuation { .. } => 0.0,
        }
    };
    let results = executor.query_argmax("a", None, 2, &score);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sequence, "b");
}

#[test]
fn index_is_independent_of_word_encounter_order() {
    let idx_a = WordIndex::build(Cursor::new("a b c d\n"), 2, std::path::Path::new("a")).unwrap();
    let idx_b = WordIndex::build(Cursor::new("d c b a\n"), 2, std::path::Path::new("b")).unwrap();
    for word in ["a", "b", "c", "d"] {
        assert_eq!(idx_a.bucket_of(word), idx_b.bucket_of(word));
    }
}

//! PipelineDriver: schedules Sequencer and Aggregator passes across a
//! bounded worker pool and writes the corpus statistics every consumer
//! needs (spec §4.5, §5).

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender};
use log::info;

use crate::aggregator::{aggregate_absolute, aggregate_continuation, AggregatorConfig};
use crate::error::GlamtkError;
use crate::index::WordIndex;
use crate::pattern::Pattern;
use crate::sequencer::{Sequencer, SequencerConfig};
use crate::store::{CorpusStats, PatternStore};

/// Every numeric/behavioural knob the pipeline driver needs, exposed as
/// config fields rather than buried constants (teacher idiom, `app.rs`'s
/// `CommonConfig`).
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub sentence_markers: bool,
    pub open_file_budget: usize,
    pub spill_threshold_keys: usize,
    /// Worker threads for the Aggregator stage. Mirrors the teacher's
    /// `min(num_cpus::get() / 2, 20)` default, computed by the CLI layer
    /// and passed in here rather than read from `num_cpus` inside the
    /// library (the library stays free of a hardware-detection dependency).
    pub n_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sentence_markers: false,
            open_file_budget: 256,
            spill_threshold_keys: 1_000_000,
            n_threads: 4,
        }
    }
}

/// Drives one full build: WordIndex, then Sequencer + Aggregator for every
/// requested pattern, skipping already up-to-date stores (spec §4.5
/// idempotence).
pub struct PipelineDriver {
    working_dir: PathBuf,
    config: PipelineConfig,
}

impl PipelineDriver {
    pub fn new(working_dir: &Path, config: PipelineConfig) -> PipelineDriver {
        PipelineDriver { working_dir: working_dir.to_path_buf(), config }
    }

    fn index_path(&self) -> PathBuf {
        self.working_dir.join("index.txt")
    }

    fn stats_path(&self) -> PathBuf {
        self.working_dir.join("stats.txt")
    }

    fn run_config_path(&self) -> PathBuf {
        self.working_dir.join("run-config.toml")
    }

    /// Build (or load) the WordIndex, then Sequencer+Aggregator every
    /// absolute pattern in `patterns` plus the continuation family each
    /// one needs, in an order that never aggregates a continuation pattern
    /// before the absolute store it derives from exists.
    pub fn run(&self, corpus_path: &Path, patterns: &[Pattern]) -> Result<WordIndex, GlamtkError> {
        std::fs::create_dir_all(&self.working_dir)
            .map_err(|e| GlamtkError::io(&self.working_dir, "create_dir_all", e))?;

        let index = self.build_or_load_index(corpus_path)?;
        self.write_run_config()?;

        let ordered = Self::topological_closure(patterns);
        // Only absolute patterns ever get sequenced: `aggregate_continuation`
        // derives a continuation pattern's counts straight from its source
        // absolute pattern's already-aggregated chunks and never reads a
        // split file of its own, so sequencing a continuation pattern would
        // just write output nothing consumes.
        let sequenceable: Vec<Pattern> = ordered.iter().filter(|p| p.is_absolute()).cloned().collect();
        let by_length = Self::group_by_length(&sequenceable);

        for (length, group) in by_length {
            info!("sequencing {} pattern(s) of length {}", group.len(), length);
            self.sequence_group(&index, corpus_path, &group)?;
        }

        for pattern in &ordered {
            let store = PatternStore::new(&self.working_dir, pattern.clone());
            if store.is_up_to_date(index.n_buckets(), corpus_path) {
                info!("pattern {} already up to date, skipping aggregation", pattern.label());
                continue;
            }
            if pattern.is_absolute() {
                self.aggregate_absolute_pattern(&index, pattern)?;
            } else {
                info!("deriving continuation counts for pattern {}", pattern.label());
                aggregate_continuation(pattern, &self.working_dir, &index)?;
            }
        }

        Ok(index)
    }

    fn build_or_load_index(&self, corpus_path: &Path) -> Result<WordIndex, GlamtkError> {
        let index_path = self.index_path();
        let stats_path = self.stats_path();
        if index_path.exists() && stats_path.exists() {
            let stats = CorpusStats::read_from_path(&stats_path)?;
            if stats.sentence_markers == self.config.sentence_markers {
                let n_buckets = WordIndex::default_bucket_count(stats.vocab_size);
                let file = File::open(&index_path).map_err(|e| GlamtkError::io(&index_path, "open", e))?;
                return WordIndex::read(BufReader::new(file), n_buckets, stats.vocab_size, &index_path);
            }
            info!("stats.txt sentence_markers mismatch, rebuilding index");
        }

        let file = File::open(corpus_path).map_err(|e| GlamtkError::io(corpus_path, "open", e))?;
        // A first pass only to learn the vocabulary size, so the bucket
        // count can be the spec's sqrt(|V|) default before the real build.
        let probe = WordIndex::build(BufReader::new(file), 1, corpus_path)?;
        let n_buckets = WordIndex::default_bucket_count(probe.vocab_size());

        let file = File::open(corpus_path).map_err(|e| GlamtkError::io(corpus_path, "open", e))?;
        let index = WordIndex::build(BufReader::new(file), n_buckets, corpus_path)?;
        index.write_to_path(&self.index_path())?;

        let line_count = std::fs::read_to_string(corpus_path)
            .map(|s| s.lines().count() as u64)
            .unwrap_or(0);
        let token_count = std::fs::read_to_string(corpus_path)
            .map(|s| s.split_whitespace().count() as u64)
            .unwrap_or(0);
        let stats = CorpusStats {
            vocab_size: index.vocab_size(),
            token_count,
            line_count,
            sentence_markers: self.config.sentence_markers,
        };
        stats.write_to_path(&self.stats_path())?;

        Ok(index)
    }

    fn write_run_config(&self) -> Result<(), GlamtkError> {
        #[derive(serde::Serialize)]
        struct RunConfig {
            sentence_markers: bool,
            open_file_budget: usize,
            spill_threshold_keys: usize,
            n_threads: usize,
        }
        let snapshot = RunConfig {
            sentence_markers: self.config.sentence_markers,
            open_file_budget: self.config.open_file_budget,
            spill_threshold_keys: self.config.spill_threshold_keys,
            n_threads: self.config.n_threads,
        };
        let toml = toml::to_string_pretty(&snapshot)
            .map_err(|e| GlamtkError::invariant(format!("failed to serialise run config: {}", e)))?;
        std::fs::write(self.run_config_path(), toml)
            .map_err(|e| GlamtkError::io(self.run_config_path(), "write", e))
    }

    /// Every pattern in `patterns`, plus (transitively) the continuation
    /// family each absolute one needs, deduplicated. Absolute patterns
    /// sort before any continuation pattern derived from them, since
    /// `run` aggregates in this order.
    fn topological_closure(patterns: &[Pattern]) -> Vec<Pattern> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut absolute = Vec::new();
        let mut continuation = Vec::new();

        let mut queue: Vec<Pattern> = patterns.to_vec();
        let mut idx = 0;
        while idx < queue.len() {
            let pattern = queue[idx].clone();
            idx += 1;
            if !seen.insert(pattern.label()) {
                continue;
            }
            if pattern.is_absolute() {
                absolute.push(pattern);
            } else {
                let source = pattern.continuation_source();
                if !seen.contains(&source.label()) {
                    queue.push(source);
                }
                continuation.push(pattern);
            }
        }

        absolute.extend(continuation);
        absolute
    }

    fn group_by_length(patterns: &[Pattern]) -> Vec<(usize, Vec<Pattern>)> {
        let mut groups: Vec<(usize, Vec<Pattern>)> = Vec::new();
        for pattern in patterns {
            match groups.iter_mut().find(|group| group.0 == pattern.len()) {
                Some(group) => group.1.push(pattern.clone()),
                None => groups.push((pattern.len(), vec![pattern.clone()])),
            }
        }
        groups
    }

    fn sequence_group(
        &self,
        index: &WordIndex,
        corpus_path: &Path,
        group: &[Pattern],
    ) -> Result<(), GlamtkError> {
        let stale: Vec<Pattern> = group
            .iter()
            .filter(|p| !PatternStore::new(&self.working_dir, (*p).clone()).is_up_to_date(index.n_buckets(), corpus_path))
            .cloned()
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        let config = SequencerConfig {
            sentence_markers: self.config.sentence_markers,
            open_file_budget: self.config.open_file_budget,
        };
        let sequencer = Sequencer::new(index, stale, &self.working_dir, config)?;
        let file = File::open(corpus_path).map_err(|e| GlamtkError::io(corpus_path, "open", e))?;
        sequencer.run(BufReader::new(file), corpus_path)?;
        Ok(())
    }

    /// Aggregate one absolute pattern's buckets across a bounded worker
    /// pool (spec §5): a fixed-size thread pool drains a channel of
    /// bucket-aggregation jobs, mirroring the teacher's own hand-rolled
    /// `std::thread` worker loops rather than an executor crate.
    fn aggregate_absolute_pattern(&self, index: &WordIndex, pattern: &Pattern) -> Result<(), GlamtkError> {
        let store = Arc::new(PatternStore::new(&self.working_dir, pattern.clone()));
        let agg_config = AggregatorConfig { spill_threshold_keys: self.config.spill_threshold_keys };
        let n_threads = self.config.n_threads.max(1);
        let n_buckets = index.n_buckets();

        let (tx, rx) = bounded::<u32>(n_buckets as usize);
        let (err_tx, err_rx) = bounded::<GlamtkError>(n_buckets as usize);

        thread::scope(|scope| {
            for _ in 0..n_threads.min(n_buckets.max(1) as usize) {
                let rx = rx.clone();
                let store = Arc::clone(&store);
                let err_tx: Sender<GlamtkError> = err_tx.clone();
                scope.spawn(move || {
                    for bucket in rx.iter() {
                        let result = aggregate_absolute(&store.split_path(bucket), &store.chunk_path(bucket), &agg_config);
                        if let Err(e) = result {
                            let _ = err_tx.send(e);
                        }
                    }
                });
            }
            drop(rx);
            drop(err_tx);
            for bucket in 0..n_buckets {
                let _ = tx.send(bucket);
            }
            drop(tx);
        });

        if let Ok(e) = err_rx.try_recv() {
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn run_builds_unigram_and_bigram_idempotently() {
        let dir = tempdir().unwrap();
        let corpus_path = dir.path().join("corpus.txt");
        std::fs::write(&corpus_path, "a b a b a\n").unwrap();

        let driver = PipelineDriver::new(dir.path().join("work").as_path(), PipelineConfig::default());
        let patterns = vec![Pattern::parse("c").unwrap(), Pattern::parse("cc").unwrap()];
        let index = driver.run(&corpus_path, &patterns).unwrap();
        assert_eq!(index.vocab_size(), 2);

        // Re-running without touching the corpus must be a no-op that still
        // returns a consistent index (spec §4.5 idempotence).
        let index_again = driver.run(&corpus_path, &patterns).unwrap();
        assert_eq!(index_again.vocab_size(), index.vocab_size());
    }

    #[test]
    fn run_derives_continuation_pattern_after_its_source() {
        let dir = tempdir().unwrap();
        let corpus_path = dir.path().join("corpus.txt");
        let mut f = File::create(&corpus_path).unwrap();
        writeln!(f, "a b c").unwrap();
        writeln!(f, "a b d").unwrap();
        drop(f);

        let driver = PipelineDriver::new(dir.path().join("work").as_path(), PipelineConfig::default());
        let patterns = vec![Pattern::parse("wc").unwrap()];
        let index = driver.run(&corpus_path, &patterns).unwrap();

        let cont_store = PatternStore::new(dir.path().join("work").as_path(), Pattern::parse("wc").unwrap());
        assert!(cont_store.chunk_path(0).exists() || (1..index.n_buckets()).any(|b| cont_store.chunk_path(b).exists()));
    }
}

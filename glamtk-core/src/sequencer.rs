//! Sequencer: streams the corpus and projects it into per-(Pattern, bucket)
//! split files (spec §4.3).

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::GlamtkError;
use crate::index::WordIndex;
use crate::markers::{check_reserved, SENTENCE_END, SENTENCE_START};
use crate::pattern::{Pattern, Token};
use crate::store::PatternStore;

/// Knobs for one sequencer pass.
#[derive(Debug, Clone, Copy)]
pub struct SequencerConfig {
    /// Prepend/append sentence-boundary markers before sliding the window.
    /// Must match between build and every query sub-cache (spec §9).
    pub sentence_markers: bool,
    /// Maximum number of (Pattern, bucket) writers kept open at once
    /// (spec §4.3 resource policy).
    pub open_file_budget: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig { sentence_markers: false, open_file_budget: 256 }
    }
}

/// An LRU cache of open append writers, one per split file. Closing the
/// least-recently-written writer on overflow is safe because split files
/// are unsorted and reopened in append mode (spec §4.3).
struct LruWriterCache {
    budget: usize,
    writers: HashMap<PathBuf, BufWriter<File>>,
    recency: VecDeque<PathBuf>,
}

impl LruWriterCache {
    fn new(budget: usize) -> Self {
        LruWriterCache { budget: budget.max(1), writers: HashMap::new(), recency: VecDeque::new() }
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.recency.iter().position(|p| p == path) {
            self.recency.remove(pos);
        }
        self.recency.push_back(path.to_path_buf());
    }

    fn write_line(&mut self, path: &Path, line: &str) -> Result<(), GlamtkError> {
        if !self.writers.contains_key(path) {
            if self.writers.len() >= self.budget {
                if let Some(victim) = self.recency.pop_front() {
                    if let Some(mut w) = self.writers.remove(&victim) {
                        w.flush().map_err(|e| GlamtkError::io(&victim, "flush", e))?;
                    }
                }
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| GlamtkError::io(parent, "create_dir_all", e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| GlamtkError::io(path, "open", e))?;
            self.writers.insert(path.to_path_buf(), BufWriter::new(file));
        }
        self.touch(path);
        let w = self.writers.get_mut(path).unwrap();
        writeln!(w, "{}", line).map_err(|e| GlamtkError::io(path, "write", e))?;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), GlamtkError> {
        for (path, w) in self.writers.iter_mut() {
            w.flush().map_err(|e| GlamtkError::io(path, "flush", e))?;
        }
        Ok(())
    }
}

/// Streams a tokenised corpus and writes split files for every requested
/// pattern of a common length.
pub struct Sequencer<'a> {
    index: &'a WordIndex,
    patterns: Vec<Pattern>,
    working_dir: PathBuf,
    config: SequencerConfig,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        index: &'a WordIndex,
        patterns: Vec<Pattern>,
        working_dir: &Path,
        config: SequencerConfig,
    ) -> Result<Sequencer<'a>, GlamtkError> {
        if patterns.is_empty() {
            return Err(GlamtkError::invariant("sequencer requires at least one pattern"));
        }
        if patterns.iter().any(|p| p.is_continuation()) {
            // A continuation pattern's counts are always re-derived from its
            // source absolute pattern's aggregated chunks
            // (`aggregator::aggregate_continuation`), never from a split
            // file of its own, so it has no business being sequenced.
            return Err(GlamtkError::invariant("sequencer only accepts absolute patterns"));
        }
        let l = patterns[0].len();
        if patterns.iter().any(|p| p.len() != l) {
            return Err(GlamtkError::invariant("all patterns in one sequencer pass must share a length"));
        }
        Ok(Sequencer { index, patterns, working_dir: working_dir.to_path_buf(), config })
    }

    pub fn pattern_length(&self) -> usize {
        self.patterns[0].len()
    }

    /// Run one pass over `reader`, emitting every (Pattern, n-gram)
    /// occurrence exactly once (spec §4.3 guarantees).
    pub fn run<R: BufRead>(&self, reader: R, corpus_path: &Path) -> Result<u64, GlamtkError> {
        let l = self.pattern_length();
        let mut writers = LruWriterCache::new(self.config.open_file_budget);
        let mut emitted = 0u64;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| GlamtkError::io(corpus_path, "read", e))?;
            let mut tokens: Vec<&str> = Vec::new();
            if self.config.sentence_markers {
                tokens.push(SENTENCE_START);
            }
            for tok in line.split_whitespace() {
                check_reserved(corpus_path, line_no + 1, tok)?;
                tokens.push(tok);
            }
            if self.config.sentence_markers {
                tokens.push(SENTENCE_END);
            }
            if tokens.len() < l {
                continue;
            }
            for start in 0..=(tokens.len() - l) {
                let window: Vec<Token<'_>> = tokens[start..start + l].iter().map(|w| Token::word(w)).collect();
                for pattern in &self.patterns {
                    let key = pattern.apply(&window)?;
                    let bucket = match pattern.first_cnt_index() {
                        Some(i) => self.index.bucket_of(window[i].word),
                        None => 0,
                    };
                    let store = PatternStore::new(&self.working_dir, pattern.clone());
                    let split_path = store.split_path(bucket);
                    writers.write_line(&split_path, &key)?;
                    emitted += 1;
                }
            }
        }

        writers.flush_all()?;
        Ok(emitted)
    }
}

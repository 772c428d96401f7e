//! The on-disk chunked layout (spec §3 "Chunk"/"Pattern store", §6 working
//! directory layout).

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::GlamtkError;
use crate::pattern::Pattern;

/// A count record: either a single absolute count, or the continuation
/// tuple `(n1+, n1, n2, n3+)` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountRecord {
    Absolute(u64),
    Continuation { n1_plus: u64, n1: u64, n2: u64, n3_plus: u64 },
}

impl CountRecord {
    /// Spec invariant 3: `n1+ >= n1+n2+n3+`; all components non-negative
    /// (guaranteed by the `u64` type).
    pub fn check_invariant(&self) -> Result<(), GlamtkError> {
        if let CountRecord::Continuation { n1_plus, n1, n2, n3_plus } = self {
            if *n1_plus < n1 + n2 + n3_plus {
                return Err(GlamtkError::invariant(format!(
                    "continuation record violates n1+ >= n1+n2+n3+: n1+={} n1={} n2={} n3+={}",
                    n1_plus, n1, n2, n3_plus
                )));
            }
        }
        Ok(())
    }

    fn to_fields(self) -> Vec<String> {
        match self {
            CountRecord::Absolute(c) => vec![c.to_string()],
            CountRecord::Continuation { n1_plus, n1, n2, n3_plus } => {
                vec![n1_plus.to_string(), n1.to_string(), n2.to_string(), n3_plus.to_string()]
            }
        }
    }

    fn parse(fields: &[&str], path: &Path, line: usize) -> Result<CountRecord, GlamtkError> {
        match fields.len() {
            1 => {
                let c = fields[0]
                    .parse()
                    .map_err(|_| GlamtkError::file_format(path, line, "malformed absolute count"))?;
                Ok(CountRecord::Absolute(c))
            }
            4 => {
                let parse_u64 = |s: &str| -> Result<u64, GlamtkError> {
                    s.parse().map_err(|_| GlamtkError::file_format(path, line, "malformed continuation count"))
                };
                let record = CountRecord::Continuation {
                    n1_plus: parse_u64(fields[0])?,
                    n1: parse_u64(fields[1])?,
                    n2: parse_u64(fields[2])?,
                    n3_plus: parse_u64(fields[3])?,
                };
                record.check_invariant()?;
                Ok(record)
            }
            n => Err(GlamtkError::file_format(
                path,
                line,
                format!("expected 1 or 4 count fields, found {}", n),
            )),
        }
    }
}

/// Writes a sorted, deduplicated chunk file: `seq\tcount[...]` lines in
/// strictly ascending byte order of `seq` (spec invariant 2).
pub fn write_chunk(path: &Path, entries: &BTreeMap<String, CountRecord>) -> Result<(), GlamtkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GlamtkError::io(parent, "create_dir_all", e))?;
    }
    let file = fs::File::create(path).map_err(|e| GlamtkError::io(path, "create", e))?;
    let mut w = BufWriter::new(file);
    for (seq, record) in entries {
        record.check_invariant()?;
        let mut line = seq.clone();
        for field in record.to_fields() {
            line.push('\t');
            line.push_str(&field);
        }
        writeln!(w, "{}", line).map_err(|e| GlamtkError::io(path, "write", e))?;
    }
    w.flush().map_err(|e| GlamtkError::io(path, "flush", e))?;
    Ok(())
}

/// Reads a chunk file into an ordered map, verifying strictly ascending
/// keys (spec invariant 2) and the continuation invariant (invariant 3).
pub fn read_chunk(path: &Path) -> Result<BTreeMap<String, CountRecord>, GlamtkError> {
    let file = fs::File::open(path).map_err(|e| GlamtkError::io(path, "open", e))?;
    let reader = BufReader::new(file);
    let mut out = BTreeMap::new();
    let mut last_key: Option<String> = None;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| GlamtkError::io(path, "read", e))?;
        if line.is_empty() {
            continue;
        }
        let mut fields: Vec<&str> = line.split('\t').collect();
        if fields.is_empty() {
            continue;
        }
        let seq = fields.remove(0).to_string();
        if let Some(prev) = &last_key {
            if &seq <= prev {
                return Err(GlamtkError::invariant(format!(
                    "chunk {} is not strictly ascending at line {}",
                    path.display(),
                    idx + 1
                )));
            }
        }
        let record = CountRecord::parse(&fields, path, idx + 1)?;
        last_key = Some(seq.clone());
        out.insert(seq, record);
    }
    Ok(out)
}

/// Directory conventions for one [`Pattern`]'s store (spec §6).
pub struct PatternStore {
    root: PathBuf,
    pattern: Pattern,
}

impl PatternStore {
    pub fn new(working_dir: &Path, pattern: Pattern) -> PatternStore {
        PatternStore { root: working_dir.to_path_buf(), pattern }
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.root.join(self.pattern.label())
    }

    pub fn chunk_path(&self, bucket: u32) -> PathBuf {
        self.chunk_dir().join(bucket.to_string())
    }

    pub fn split_dir(&self) -> PathBuf {
        self.root.join(format!("{}-split", self.pattern.label()))
    }

    pub fn split_path(&self, bucket: u32) -> PathBuf {
        self.split_dir().join(bucket.to_string())
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// True if every bucket's chunk exists and is newer than `corpus_path`
    /// (the idempotence check in spec §4.5).
    pub fn is_up_to_date(&self, n_buckets: u32, corpus_path: &Path) -> bool {
        let corpus_modified = match fs::metadata(corpus_path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        for bucket in 0..n_buckets {
            let chunk_path = self.chunk_path(bucket);
            let chunk_modified = match fs::metadata(&chunk_path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => return false,
            };
            if chunk_modified < corpus_modified {
                return false;
            }
        }
        true
    }

    pub fn delete(&self) -> Result<(), GlamtkError> {
        if self.chunk_dir().exists() {
            fs::remove_dir_all(self.chunk_dir()).map_err(|e| GlamtkError::io(self.chunk_dir(), "remove_dir_all", e))?;
        }
        Ok(())
    }

    pub fn delete_split(&self) -> Result<(), GlamtkError> {
        if self.split_dir().exists() {
            fs::remove_dir_all(self.split_dir()).map_err(|e| GlamtkError::io(self.split_dir(), "remove_dir_all", e))?;
        }
        Ok(())
    }
}

/// Corpus statistics persisted as `stats.txt` (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub vocab_size: usize,
    pub token_count: u64,
    pub line_count: u64,
    pub sentence_markers: bool,
}

impl CorpusStats {
    pub fn write_to_path(&self, path: &Path) -> Result<(), GlamtkError> {
        let file = fs::File::create(path).map_err(|e| GlamtkError::io(path, "create", e))?;
        let mut w = BufWriter::new(file);
        writeln!(w, "vocab_size\t{}", self.vocab_size).map_err(|e| GlamtkError::io(path, "write", e))?;
        writeln!(w, "token_count\t{}", self.token_count).map_err(|e| GlamtkError::io(path, "write", e))?;
        writeln!(w, "line_count\t{}", self.line_count).map_err(|e| GlamtkError::io(path, "write", e))?;
        writeln!(w, "sentence_markers\t{}", self.sentence_markers)
            .map_err(|e| GlamtkError::io(path, "write", e))?;
        Ok(())
    }

    pub fn read_from_path(path: &Path) -> Result<CorpusStats, GlamtkError> {
        let file = fs::File::open(path).map_err(|e| GlamtkError::io(path, "open", e))?;
        let reader = BufReader::new(file);
        let mut vocab_size = None;
        let mut token_count = None;
        let mut line_count = None;
        let mut sentence_markers = None;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| GlamtkError::io(path, "read", e))?;
            let mut parts = line.splitn(2, '\t');
            let key = parts.next().unwrap_or_default();
            let value = parts
                .next()
                .ok_or_else(|| GlamtkError::file_format(path, idx + 1, "missing stats value"))?;
            match key {
                "vocab_size" => vocab_size = value.parse().ok(),
                "token_count" => token_count = value.parse().ok(),
                "line_count" => line_count = value.parse().ok(),
                "sentence_markers" => sentence_markers = value.parse().ok(),
                _ => {}
            }
        }
        Ok(CorpusStats {
            vocab_size: vocab_size.unwrap_or(0),
            token_count: token_count.unwrap_or(0),
            line_count: line_count.unwrap_or(0),
            sentence_markers: sentence_markers.unwrap_or(false),
        })
    }
}

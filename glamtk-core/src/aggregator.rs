//! Aggregator: sorts and sums one split file's keys into a chunk, deriving
//! continuation counts where required (spec §4.4).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::error::GlamtkError;
use crate::index::WordIndex;
use crate::pattern::Pattern;
use crate::store::{read_chunk, write_chunk, CountRecord, PatternStore};

/// Knobs for one aggregation.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Spill to disk once the in-memory key count would exceed this bound
    /// (spec §4.4 algorithm step 1 / §5 memory budget).
    pub spill_threshold_keys: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig { spill_threshold_keys: 1_000_000 }
    }
}

/// Aggregate one absolute pattern's split file into a sorted chunk.
///
/// Small files are summed in memory; once the live key count would exceed
/// `config.spill_threshold_keys`, sorted runs are spilled to temp files and
/// merged with a k-way merge (spec §4.4 algorithm step 1). Any I/O fault
/// deletes the partial chunk before the error is surfaced (spec §4.4
/// "Failure").
pub fn aggregate_absolute(
    split_path: &Path,
    out_path: &Path,
    config: &AggregatorConfig,
) -> Result<(), GlamtkError> {
    match aggregate_absolute_inner(split_path, out_path, config) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(out_path);
            Err(e)
        }
    }
}

fn aggregate_absolute_inner(
    split_path: &Path,
    out_path: &Path,
    config: &AggregatorConfig,
) -> Result<(), GlamtkError> {
    if !split_path.exists() {
        // No occurrences landed in this bucket; an empty chunk is valid.
        return write_chunk(out_path, &BTreeMap::new());
    }

    let file = File::open(split_path).map_err(|e| GlamtkError::io(split_path, "open", e))?;
    let reader = BufReader::new(file);

    let mut map: FnvHashMap<String, u64> = FnvHashMap::default();
    let mut spill_files: Vec<PathBuf> = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| GlamtkError::io(split_path, "read", e))?;
        if line.is_empty() {
            continue;
        }
        *map.entry(line).or_insert(0) += 1;
        if map.len() >= config.spill_threshold_keys {
            spill_files.push(spill_run(&mut map, out_path)?);
        }
    }

    if spill_files.is_empty() {
        let entries: BTreeMap<String, CountRecord> =
            map.into_iter().map(|(k, v)| (k, CountRecord::Absolute(v))).collect();
        write_chunk(out_path, &entries)?;
    } else {
        if !map.is_empty() {
            spill_files.push(spill_run(&mut map, out_path)?);
        }
        merge_spill_runs(&spill_files, out_path)?;
        for f in &spill_files {
            let _ = fs::remove_file(f);
        }
    }
    Ok(())
}

fn spill_run(map: &mut FnvHashMap<String, u64>, out_path: &Path) -> Result<PathBuf, GlamtkError> {
    let dir = out_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| GlamtkError::io(dir, "create_dir_all", e))?;
    let tmp = tempfile::Builder::new()
        .prefix("glamtk-spill-")
        .tempfile_in(dir)
        .map_err(|e| GlamtkError::io(dir, "create_temp", e))?
        .into_temp_path()
        .keep()
        .map_err(|e| GlamtkError::io(dir, "persist_temp", e.error))?;

    let mut entries: Vec<(String, u64)> = map.drain().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let file = File::create(&tmp).map_err(|e| GlamtkError::io(&tmp, "create", e))?;
    let mut w = BufWriter::new(file);
    for (key, count) in entries {
        writeln!(w, "{}\t{}", key, count).map_err(|e| GlamtkError::io(&tmp, "write", e))?;
    }
    w.flush().map_err(|e| GlamtkError::io(&tmp, "flush", e))?;
    Ok(tmp)
}

/// One position in a k-way merge over sorted, line-delimited `key\tcount`
/// runs. Mirrors the `MergePointer`/`BinaryHeap<Reverse<_>>` idiom used to
/// merge sorted FST streams in spell-correction n-gram trainers.
struct MergeCursor {
    reader: std::io::Lines<BufReader<File>>,
    key: String,
    count: u64,
    done: bool,
}

impl MergeCursor {
    fn open(path: &Path) -> Result<MergeCursor, GlamtkError> {
        let file = File::open(path).map_err(|e| GlamtkError::io(path, "open", e))?;
        let mut cursor = MergeCursor {
            reader: BufReader::new(file).lines(),
            key: String::new(),
            count: 0,
            done: false,
        };
        cursor.advance(path)?;
        Ok(cursor)
    }

    fn advance(&mut self, path: &Path) -> Result<(), GlamtkError> {
        match self.reader.next() {
            Some(line) => {
                let line = line.map_err(|e| GlamtkError::io(path, "read", e))?;
                let mut parts = line.splitn(2, '\t');
                self.key = parts.next().unwrap_or_default().to_string();
                self.count = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| GlamtkError::invariant("malformed spill run line"))?;
            }
            None => self.done = true,
        }
        Ok(())
    }
}

impl PartialEq for MergeCursor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for MergeCursor {}
impl PartialOrd for MergeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MergeCursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

fn merge_spill_runs(spill_files: &[PathBuf], out_path: &Path) -> Result<(), GlamtkError> {
    let mut heap: BinaryHeap<Reverse<(MergeCursor, PathBuf)>> = BinaryHeap::new();
    for path in spill_files {
        let cursor = MergeCursor::open(path)?;
        if !cursor.done {
            heap.push(Reverse((cursor, path.clone())));
        }
    }

    let mut entries: BTreeMap<String, CountRecord> = BTreeMap::new();
    while let Some(Reverse((mut cursor, path))) = heap.pop() {
        let key = cursor.key.clone();
        let mut total = cursor.count;
        cursor.advance(&path)?;
        if !cursor.done {
            heap.push(Reverse((cursor, path.clone())));
        }
        while let Some(Reverse((top, _))) = heap.peek() {
            if top.key != key {
                break;
            }
            let Reverse((mut other, other_path)) = heap.pop().unwrap();
            total += other.count;
            other.advance(&other_path)?;
            if !other.done {
                heap.push(Reverse((other, other_path)));
            }
        }
        entries.insert(key, CountRecord::Absolute(total));
    }

    write_chunk(out_path, &entries)
}

/// Aggregate every continuation pattern derived from `base` (spec §4.4
/// algorithm step 2, scenario 2). Unlike the absolute case this is a
/// whole-store pass: a projected continuation key can land in a different
/// bucket than its literal source key, so every output bucket is produced
/// together from one read of `base`'s chunks.
pub fn aggregate_continuation(
    continuation: &Pattern,
    working_dir: &Path,
    index: &WordIndex,
) -> Result<(), GlamtkError> {
    let base_pattern = continuation.continuation_source();
    let base_store = PatternStore::new(working_dir, base_pattern);
    let cont_store = PatternStore::new(working_dir, continuation.clone());

    // For each continuation key: (n1+, n1, n2, n3+) accumulated from the
    // absolute counts `c` of the distinct literal keys projecting onto it.
    let mut per_bucket: Vec<BTreeMap<String, (u64, u64, u64, u64)>> =
        vec![BTreeMap::new(); index.n_buckets() as usize];

    aggregate_continuation_result(&base_store, continuation, index, &mut per_bucket)?;

    for (bucket, keys) in per_bucket.into_iter().enumerate() {
        let out_path = cont_store.chunk_path(bucket as u32);
        let entries: BTreeMap<String, CountRecord> = keys
            .into_iter()
            .map(|(key, (n1_plus, n1, n2, n3_plus))| {
                (key, CountRecord::Continuation { n1_plus, n1, n2, n3_plus })
            })
            .collect();
        if let Err(e) = write_chunk(&out_path, &entries) {
            let _ = fs::remove_file(&out_path);
            return Err(e);
        }
    }
    Ok(())
}

fn aggregate_continuation_result(
    base_store: &PatternStore,
    continuation: &Pattern,
    index: &WordIndex,
    per_bucket: &mut [BTreeMap<String, (u64, u64, u64, u64)>],
) -> Result<(), GlamtkError> {
    for bucket in 0..index.n_buckets() {
        let chunk_path = base_store.chunk_path(bucket);
        if !chunk_path.exists() {
            continue;
        }
        let chunk = read_chunk(&chunk_path)?;
        for (literal_key, record) in chunk {
            let c = match record {
                CountRecord::Absolute(c) => c,
                CountRecord::Continuation { .. } => {
                    return Err(GlamtkError::invariant(
                        "continuation_source store unexpectedly holds continuation records",
                    ))
                }
            };
            let words: Vec<&str> = literal_key.split(' ').collect();
            if words.len() != continuation.len() {
                return Err(GlamtkError::invariant(
                    "literal key arity mismatches continuation pattern length",
                ));
            }
            let tokens: Vec<crate::pattern::Token<'_>> =
                words.iter().map(|w| crate::pattern::Token::word(w)).collect();
            let cont_key = continuation.apply(&tokens)?;
            let out_bucket = match continuation.first_cnt_index() {
                Some(i) => index.bucket_of(tokens[i].word),
                None => 0,
            };
            let entry = per_bucket[out_bucket as usize].entry(cont_key).or_insert((0, 0, 0, 0));
            entry.0 += 1;
            match c {
                1 => entry.1 += 1,
                2 => entry.2 += 1,
                _ => entry.3 += 1,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PatternStore;
    use std::io::Cursor;

    #[test]
    fn small_split_aggregates_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = Pattern::parse("cc").unwrap();
        let store = PatternStore::new(dir.path(), pattern);
        let split_path = store.split_path(0);
        fs::create_dir_all(split_path.parent().unwrap()).unwrap();
        fs::write(&split_path, "a b\na b\nb a\n").unwrap();

        let out_path = store.chunk_path(0);
        aggregate_absolute(&split_path, &out_path, &AggregatorConfig::default()).unwrap();
        let chunk = read_chunk(&out_path).unwrap();
        assert_eq!(chunk.get("a b"), Some(&CountRecord::Absolute(2)));
        assert_eq!(chunk.get("b a"), Some(&CountRecord::Absolute(1)));
    }

    #[test]
    fn spill_path_matches_in_memory_result() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = Pattern::parse("c").unwrap();
        let store = PatternStore::new(dir.path(), pattern);
        let split_path = store.split_path(0);
        fs::create_dir_all(split_path.parent().unwrap()).unwrap();
        let mut contents = String::new();
        for i in 0..50 {
            for _ in 0..(i % 3 + 1) {
                contents.push_str(&format!("word{}\n", i));
            }
        }
        fs::write(&split_path, &contents).unwrap();

        let out_small = store.chunk_path(0);
        aggregate_absolute(&split_path, &out_small, &AggregatorConfig::default()).unwrap();
        let big_config = AggregatorConfig { spill_threshold_keys: 5 };
        let out_spilled = dir.path().join("spilled-chunk");
        aggregate_absolute(&split_path, &out_spilled, &big_config).unwrap();

        assert_eq!(read_chunk(&out_small).unwrap(), read_chunk(&out_spilled).unwrap());
    }

    #[test]
    fn scenario_two_continuation_counts() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = "a b c\na b d\n";
        let index = crate::index::WordIndex::build(Cursor::new(corpus), 1, Path::new("corpus")).unwrap();

        let base = Pattern::parse("cc").unwrap();
        let seq = crate::sequencer::Sequencer::new(
            &index,
            vec![base.clone()],
            dir.path(),
            crate::sequencer::SequencerConfig::default(),
        )
        .unwrap();
        seq.run(Cursor::new(corpus), Path::new("corpus")).unwrap();

        let base_store = PatternStore::new(dir.path(), base.clone());
        for bucket in 0..index.n_buckets() {
            aggregate_absolute(
                &base_store.split_path(bucket),
                &base_store.chunk_path(bucket),
                &AggregatorConfig::default(),
            )
            .unwrap();
        }

        let cont = Pattern::parse("wc").unwrap();
        aggregate_continuation(&cont, dir.path(), &index).unwrap();

        let cont_store = PatternStore::new(dir.path(), cont);
        let mut merged = BTreeMap::new();
        for bucket in 0..index.n_buckets() {
            merged.extend(read_chunk(&cont_store.chunk_path(bucket)).unwrap());
        }

        assert_eq!(
            merged.get("% b"),
            Some(&CountRecord::Continuation { n1_plus: 1, n1: 0, n2: 1, n3_plus: 0 })
        );
        assert_eq!(
            merged.get("% c"),
            Some(&CountRecord::Continuation { n1_plus: 1, n1: 1, n2: 0, n3_plus: 0 })
        );
    }
}

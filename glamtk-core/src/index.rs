//! WordIndex: a fixed, deterministic partition of the vocabulary into
//! buckets used for sharding (spec §4.1).

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::GlamtkError;
use crate::markers::check_reserved;

/// FNV-1a 64-bit, the documented stable hash (spec §4.1: "implementers MUST
/// use a documented stable hash; FNV-1a 64-bit over UTF-8 bytes is a
/// suitable default"). Resolves the §9 open question for this
/// implementation.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// An ordered partition of the observed vocabulary into `n_buckets` buckets.
#[derive(Debug, Clone)]
pub struct WordIndex {
    n_buckets: u32,
    vocab_size: usize,
    /// Per-bucket representative: the lexicographically lowest word
    /// assigned to that bucket, or `None` if no observed word landed there.
    /// Persisted so an implementation may sanity-check the mapping without
    /// storing the whole vocabulary; `bucket_of` never consults it.
    first_word: Vec<Option<String>>,
}

impl WordIndex {
    /// `bucketOf(word) -> 0..N-1`: total, pure, deterministic across
    /// processes, independent of encounter order (spec invariant 5).
    pub fn bucket_of_str(word: &str, n_buckets: u32) -> u32 {
        (fnv1a64(word.as_bytes()) % n_buckets as u64) as u32
    }

    pub fn bucket_of(&self, word: &str) -> u32 {
        Self::bucket_of_str(word, self.n_buckets)
    }

    pub fn n_buckets(&self) -> u32 {
        self.n_buckets
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn first_word_in_bucket(&self, bucket: u32) -> Option<&str> {
        self.first_word.get(bucket as usize)?.as_deref()
    }

    /// Default bucket count, per spec §3: "N is configurable, default
    /// approximately sqrt(|V|)".
    pub fn default_bucket_count(vocab_size: usize) -> u32 {
        ((vocab_size as f64).sqrt().ceil() as u32).max(1)
    }

    /// Build from a whitespace-tokenised corpus reader. Fails citing the
    /// offending line if a token contains a reserved symbol.
    pub fn build<R: BufRead>(
        reader: R,
        n_buckets: u32,
        path_for_errors: &Path,
    ) -> Result<WordIndex, GlamtkError> {
        let n_buckets = n_buckets.max(1);
        let mut first_word: Vec<Option<String>> = vec![None; n_buckets as usize];
        let mut seen: HashSet<String> = HashSet::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| GlamtkError::io(path_for_errors, "read", e))?;
            for tok in line.split_whitespace() {
                check_reserved(path_for_errors, idx + 1, tok)?;
                if seen.insert(tok.to_string()) {
                    let bucket = Self::bucket_of_str(tok, n_buckets) as usize;
                    match &first_word[bucket] {
                        Some(cur) if cur.as_str() <= tok => {}
                        _ => first_word[bucket] = Some(tok.to_string()),
                    }
                }
            }
        }

        Ok(WordIndex {
            n_buckets,
            vocab_size: seen.len(),
            first_word,
        })
    }

    /// Persist as `index.txt`: one `<bucket>\t<first-word>` line per
    /// populated bucket (spec §6).
    pub fn write<W: Write>(&self, mut w: W) -> Result<(), GlamtkError> {
        for (bucket, word) in self.first_word.iter().enumerate() {
            if let Some(word) = word {
                writeln!(w, "{}\t{}", bucket, word)
                    .map_err(|e| GlamtkError::io("index.txt", "write", e))?;
            }
        }
        Ok(())
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), GlamtkError> {
        let file = std::fs::File::create(path).map_err(|e| GlamtkError::io(path, "create", e))?;
        self.write(std::io::BufWriter::new(file))
    }

    /// Read back an `index.txt`. `n_buckets` and `vocab_size` must be
    /// supplied separately (they are persisted in `stats.txt`, not here),
    /// since `index.txt` only records bucket representatives.
    pub fn read<R: BufRead>(
        reader: R,
        n_buckets: u32,
        vocab_size: usize,
        path_for_errors: &Path,
    ) -> Result<WordIndex, GlamtkError> {
        let mut first_word: Vec<Option<String>> = vec![None; n_buckets as usize];
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| GlamtkError::io(path_for_errors, "read", e))?;
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, '\t');
            let bucket: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| GlamtkError::file_format(path_for_errors, idx + 1, "missing bucket id"))?;
            let word = parts
                .next()
                .ok_or_else(|| GlamtkError::file_format(path_for_errors, idx + 1, "missing bucket word"))?;
            if bucket as usize >= first_word.len() {
                return Err(GlamtkError::file_format(
                    path_for_errors,
                    idx + 1,
                    format!("bucket {} out of range for n_buckets={}", bucket, n_buckets),
                ));
            }
            first_word[bucket as usize] = Some(word.to_string());
        }
        Ok(WordIndex {
            n_buckets,
            vocab_size,
            first_word,
        })
    }

    pub fn read_from_path(
        path: &Path,
        n_buckets: u32,
        vocab_size: usize,
    ) -> Result<WordIndex, GlamtkError> {
        let file = std::fs::File::open(path).map_err(|e| GlamtkError::io(path, "open", e))?;
        Self::read(BufReader::new(file), n_buckets, vocab_size, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bucket_of_is_deterministic_and_total() {
        for n in [2u32, 7, 64] {
            let b1 = WordIndex::bucket_of_str("hello", n);
            let b2 = WordIndex::bucket_of_str("hello", n);
            assert_eq!(b1, b2);
            assert!(b1 < n);
        }
    }

    #[test]
    fn bucket_assignment_independent_of_encounter_order() {
        let corpus_a = "a b a b a\n";
        let corpus_b = "b a b a b\n";
        let idx_a = WordIndex::build(Cursor::new(corpus_a), 2, Path::new("a")).unwrap();
        let idx_b = WordIndex::build(Cursor::new(corpus_b), 2, Path::new("b")).unwrap();
        assert_eq!(idx_a.bucket_of("a"), idx_b.bucket_of("a"));
        assert_eq!(idx_a.bucket_of("b"), idx_b.bucket_of("b"));
    }

    #[test]
    fn reserved_symbol_cites_line_number() {
        let corpus = "a b\na _b c\n";
        let err = WordIndex::build(Cursor::new(corpus), 2, Path::new("corpus.txt")).unwrap_err();
        match err {
            GlamtkError::FileFormat { line, .. } => assert_eq!(line, 2),
            _ => panic!("expected FileFormat error"),
        }
    }

    #[test]
    fn empty_corpus_yields_empty_index() {
        let idx = WordIndex::build(Cursor::new(""), 4, Path::new("corpus.txt")).unwrap();
        assert_eq!(idx.vocab_size(), 0);
        for b in 0..4 {
            assert!(idx.first_word_in_bucket(b).is_none());
        }
    }

    #[test]
    fn write_then_read_round_trips_representatives() {
        let idx = WordIndex::build(Cursor::new("a b c d"), 2, Path::new("corpus.txt")).unwrap();
        let mut buf = Vec::new();
        idx.write(&mut buf).unwrap();
        let read_back =
            WordIndex::read(Cursor::new(buf), idx.n_buckets(), idx.vocab_size(), Path::new("index.txt"))
                .unwrap();
        for b in 0..idx.n_buckets() {
            assert_eq!(idx.first_word_in_bucket(b), read_back.first_word_in_bucket(b));
        }
    }
}

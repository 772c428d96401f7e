//! Query-file parsing: an external collaborator around the core (spec §1,
//! §6 "query-file parsing ... Their contracts are specified only where the
//! core touches them"). One query per non-blank, non-comment line; the
//! core only ever sees the resulting history/prefix strings via
//! [`glamtk_core::argmax::ArgmaxQueryExecutor::query_argmax`].

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};

/// One parsed query: a history (oldest-first tokens) and an optional
/// completion prefix (spec §4.7 `queryArgmax(history, [prefix], k)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub history: Vec<String>,
    pub prefix: Option<String>,
}

impl Query {
    /// Parses one line: whitespace-separated history tokens, optionally
    /// followed by `| prefix` to narrow completions (spec §4.7). Blank
    /// lines and lines starting with `#` are not queries (spec §8
    /// scenario 5) and are filtered out by [`QueryFile::parse`] before
    /// this is called.
    fn parse_line(line: &str) -> Query {
        let (history_part, prefix_part) = match line.split_once('|') {
            Some((h, p)) => (h, Some(p.trim().to_string())),
            None => (line, None),
        };
        let history = history_part.split_whitespace().map(|s| s.to_string()).collect();
        Query { history, prefix: prefix_part.filter(|p| !p.is_empty()) }
    }
}

/// A parsed query file: a comment (`#`) and blank-line tolerant list of
/// [`Query`] (spec §6, §8 scenario 5).
#[derive(Debug, Clone, Default)]
pub struct QueryFile {
    pub queries: Vec<Query>,
}

impl QueryFile {
    pub fn parse<R: BufRead>(reader: R) -> Result<QueryFile> {
        let mut queries = Vec::new();
        for line in reader.lines() {
            let line = line.context("reading query file")?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            queries.push(Query::parse_line(trimmed));
        }
        Ok(QueryFile { queries })
    }

    pub fn read_from_path(path: &Path) -> Result<QueryFile> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening query file {}", path.display()))?;
        Self::parse(std::io::BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn comments_and_blank_lines_produce_no_queries() {
        let file = QueryFile::parse(Cursor::new("# comment\n\n")).unwrap();
        assert!(file.queries.is_empty());
    }

    #[test]
    fn plain_history_line_has_no_prefix() {
        let file = QueryFile::parse(Cursor::new("a b\n")).unwrap();
        assert_eq!(file.queries.len(), 1);
        assert_eq!(file.queries[0].history, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(file.queries[0].prefix, None);
    }

    #[test]
    fn pipe_separates_completion_prefix() {
        let file = QueryFile::parse(Cursor::new("a b | c\n")).unwrap();
        assert_eq!(file.queries[0].history, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(file.queries[0].prefix, Some("c".to_string()));
    }

    #[test]
    fn mixed_file_skips_only_comments_and_blanks() {
        let file = QueryFile::parse(Cursor::new("a b\n# skip this\n\nc d | e\n")).unwrap();
        assert_eq!(file.queries.len(), 2);
    }
}

//! `glamtk-query`: loads a built store into a [`Cache`] and answers
//! top-k argmax completion queries from query files or stdin (spec §4.6,
//! §4.7, §6).

use std::io::{self, BufRead, Write};

use glamtk::app::QueryApp;
use glamtk::estimator::Estimator;
use glamtk::query::{Query, QueryFile};
use glamtk_core::cache::{Cache, CacheSpecification};
use glamtk_core::querycache;
use glamtk_core::store::CorpusStats;
use glamtk_core::{Pattern, WordIndex};

fn init_logging(debug: bool, log_to_console: bool) {
    let level = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if !log_to_console {
        builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
    }
    builder.init();
}

fn run_query(cache: &Cache, estimator: &Estimator<'_>, query: &Query, order: usize, top_k: usize) {
    // Keep only the most recent `order - 1` history tokens: that is the
    // longest context any built pattern can hold (spec §6 `order`).
    let max_hist = order.saturating_sub(1).max(1);
    let take = query.history.len().min(max_hist);
    let history_tokens: Vec<String> = query.history[query.history.len() - take..].to_vec();
    let pattern_len = take + 1;
    let pattern = match Pattern::new(vec![glamtk_core::PatternElem::Cnt; pattern_len]) {
        Ok(p) => p,
        Err(_) => return,
    };
    let executor = glamtk_core::argmax::ArgmaxQueryExecutor::new(cache, pattern);
    let score_fn = estimator.score_fn(history_tokens.clone());

    let history_str = history_tokens.join(" ");
    let results = executor.query_argmax(&history_str, query.prefix.as_deref(), top_k, &score_fn);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in &results {
        let _ = writeln!(out, "{}\t{:.6}", result.sequence, result.probability);
    }
    if results.is_empty() {
        let _ = writeln!(out, "(no completions observed for {:?})", history_str);
    }
}

fn main() {
    let app = QueryApp::new();
    init_logging(app.debug(), app.log_to_console());

    let stats_path = app.working_dir().join("stats.txt");
    let index_path = app.working_dir().join("index.txt");
    let stats = match CorpusStats::read_from_path(&stats_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    if stats.sentence_markers != app.sentence_markers() {
        eprintln!(
            "sentence-markers setting ({}) does not match the build ({}); rebuild or adjust --sentence-markers (spec §9)",
            app.sentence_markers(),
            stats.sentence_markers
        );
        std::process::exit(2);
    }
    let n_buckets = WordIndex::default_bucket_count(stats.vocab_size);
    let index = match WordIndex::read_from_path(&index_path, n_buckets, stats.vocab_size) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    let patterns = app.required_patterns();
    let trie_patterns: Vec<Pattern> =
        patterns.iter().filter(|p| querycache::is_literal_cnt_pattern(p)).cloned().collect();
    let spec = CacheSpecification { hash_patterns: patterns.clone(), trie_patterns };

    // One sub-cache per query file, scoped to the sequences it names (spec
    // §6 `queryCache/<hash-of-query-file>/…`, §4.5 "produces per-query
    // sub-caches"). Interactive queries have no file to hash, so they read
    // the full store's Cache instead.
    let mut groups: Vec<(Vec<Query>, Cache)> = Vec::new();
    for path in app.query_files() {
        let file = match QueryFile::read_from_path(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("{:#}", e);
                std::process::exit(2);
            }
        };
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("failed to read query file {}: {}", path.display(), e);
                std::process::exit(3);
            }
        };
        let hash = querycache::hash_query_bytes(&bytes);
        let histories: Vec<Vec<String>> = file.queries.iter().map(|q| q.history.clone()).collect();
        let sub_root = match querycache::build(app.working_dir(), &patterns, &index, &histories, &hash) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(e.exit_code());
            }
        };
        let cache = match Cache::build(&sub_root, &index, &spec) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(e.exit_code());
            }
        };
        groups.push((file.queries, cache));
    }

    if app.interactive() {
        let mut queries = Vec::new();
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line.unwrap_or_default();
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            queries.push(Query {
                history: trimmed.split_whitespace().map(|s| s.to_string()).collect(),
                prefix: None,
            });
        }
        let cache = match Cache::build(app.working_dir(), &index, &spec) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(e.exit_code());
            }
        };
        groups.push((queries, cache));
    }

    for (queries, cache) in &groups {
        for kind in app.estimators() {
            let estimator = Estimator::new(cache, *kind, app.order());
            for query in queries {
                run_query(cache, &estimator, query, app.order(), app.top_k());
            }
        }
    }
}

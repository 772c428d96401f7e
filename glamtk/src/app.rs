//! Option parsing, in the teacher's `App`/`Arg` v2 builder idiom
//! (`finalfrontier-utils::app`): static option-name constants, a
//! `build_with_common_opts` base app shared by both binaries, and a
//! small `TrainInfo`-style metadata struct serialised into the working
//! directory for reproducibility (spec §6 CLI surface).

use std::cmp;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::{App, AppSettings, Arg, ArgMatches};
use serde::Serialize;
use stdinout::OrExit;

use glamtk_core::Pattern;

use crate::estimator::EstimatorKind;

static DEFAULT_CLAP_SETTINGS: &[AppSettings] =
    &[AppSettings::DontCollapseArgsInUsage, AppSettings::UnifiedHelpMessage];

// Option constants (spec §6 CLI surface).
static WORKING_DIR: &str = "working_dir";
static ORDER: &str = "order";
static ESTIMATOR: &str = "estimator";
static SENTENCE_MARKERS: &str = "sentence_markers";
static THREADS: &str = "threads";
static SPILL_THRESHOLD: &str = "spill_threshold";
static OPEN_FILE_BUDGET: &str = "open_file_budget";
static LOG_TO_CONSOLE: &str = "log_to_console";
static DEBUG: &str = "debug";
static QUERY_FILE: &str = "query_file";
static INTERACTIVE: &str = "interactive";
static TOP_K: &str = "top_k";
static KEEP_TEMP_FILES: &str = "keep_temp_files";

// Argument constants.
static CORPUS: &str = "CORPUS";

fn version() -> &'static str {
    if let Some(git_desc) = option_env!("MAYBE_GLAMTK_GIT_DESC") {
        git_desc
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Metadata about one pipeline run, serialised by the binary alongside
/// `run-config.toml` for reproducibility (teacher idiom: `app::TrainInfo`).
#[derive(Clone, Serialize)]
pub struct TrainInfo {
    corpus: String,
    working_dir: String,
    n_threads: usize,
    start_datetime: String,
    end_datetime: Option<String>,
}

impl TrainInfo {
    pub fn new(corpus: String, working_dir: String, n_threads: usize) -> Self {
        let start: DateTime<Local> = Local::now();
        TrainInfo {
            corpus,
            working_dir,
            n_threads,
            start_datetime: start.format("%Y-%m-%d %H:%M:%S").to_string(),
            end_datetime: None,
        }
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn set_end(&mut self) {
        let end: DateTime<Local> = Local::now();
        self.end_datetime = Some(end.format("%Y-%m-%d %H:%M:%S").to_string());
    }
}

fn common_opts<'a, 'b>(name: &str) -> App<'a, 'b> {
    App::new(name)
        .settings(DEFAULT_CLAP_SETTINGS)
        .version(version())
        .arg(
            Arg::with_name(WORKING_DIR)
                .long("working-dir")
                .short("w")
                .value_name("DIR")
                .help("Working directory holding index.txt, stats.txt and pattern stores")
                .takes_value(true)
                .default_value("glamtk-work"),
        )
        .arg(
            Arg::with_name(ORDER)
                .long("order")
                .value_name("N")
                .help("Maximum training order (n-gram length)")
                .takes_value(true)
                .default_value("5"),
        )
        .arg(
            Arg::with_name(ESTIMATOR)
                .long("estimator")
                .value_name("ESTIMATOR")
                .help("Estimator(s) whose required patterns should be built/queried")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .possible_values(&["mle", "kn", "mkn", "glm"])
                .default_value("mkn"),
        )
        .arg(
            Arg::with_name(SENTENCE_MARKERS)
                .long("sentence-markers")
                .help("Insert sentence-boundary markers before/after each line (must match between build and query, spec §9)"),
        )
        .arg(
            Arg::with_name(LOG_TO_CONSOLE)
                .long("log-to-console")
                .help("Mirror the append-only log to stderr"),
        )
        .arg(Arg::with_name(DEBUG).long("debug").help("Verbose diagnostic logging"))
}

/// CLI surface for `glamtk-build`: drives the pipeline driver over a
/// training corpus (spec §4.5, §6).
pub struct BuildApp {
    train_info: TrainInfo,
    corpus: PathBuf,
    working_dir: PathBuf,
    order: usize,
    estimators: Vec<EstimatorKind>,
    sentence_markers: bool,
    n_threads: usize,
    spill_threshold_keys: usize,
    open_file_budget: usize,
    keep_temp_files: bool,
    log_to_console: bool,
    debug: bool,
}

impl BuildApp {
    pub fn new() -> Self {
        let matches = common_opts("glamtk-build")
            .arg(
                Arg::with_name(THREADS)
                    .long("threads")
                    .value_name("N")
                    .help("Worker threads for the Aggregator stage (default: min(logical_cpus / 2, 20))")
                    .takes_value(true),
            )
            .arg(
                Arg::with_name(SPILL_THRESHOLD)
                    .long("spill-threshold")
                    .value_name("KEYS")
                    .help("Aggregator in-memory key budget before spilling to disk")
                    .takes_value(true)
                    .default_value("1000000"),
            )
            .arg(
                Arg::with_name(OPEN_FILE_BUDGET)
                    .long("open-file-budget")
                    .value_name("N")
                    .help("Sequencer's bounded open-writer budget")
                    .takes_value(true)
                    .default_value("256"),
            )
            .arg(Arg::with_name(KEEP_TEMP_FILES).long("keep-temp-files").help("Keep split files after aggregation"))
            .arg(Arg::with_name(CORPUS).help("Tokenized training corpus").index(1).required(true))
            .get_matches();

        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let corpus: PathBuf = matches.value_of(CORPUS).unwrap().into();
        let working_dir: PathBuf = matches.value_of(WORKING_DIR).unwrap().into();
        let order = matches.value_of(ORDER).map(|v| v.parse().or_exit("Cannot parse order", 1)).unwrap();
        let estimators = matches
            .values_of(ESTIMATOR)
            .unwrap()
            .map(|v| EstimatorKind::parse(v).or_exit("Cannot parse estimator", 1))
            .collect();
        let sentence_markers = matches.is_present(SENTENCE_MARKERS);
        let n_threads = matches
            .value_of(THREADS)
            .map(|v| v.parse().or_exit("Cannot parse number of threads", 1))
            .unwrap_or_else(|| cmp::min(num_cpus::get() / 2, 20).max(1));
        let spill_threshold_keys =
            matches.value_of(SPILL_THRESHOLD).map(|v| v.parse().or_exit("Cannot parse spill threshold", 1)).unwrap();
        let open_file_budget =
            matches.value_of(OPEN_FILE_BUDGET).map(|v| v.parse().or_exit("Cannot parse open file budget", 1)).unwrap();
        let keep_temp_files = matches.is_present(KEEP_TEMP_FILES);
        let log_to_console = matches.is_present(LOG_TO_CONSOLE);
        let debug = matches.is_present(DEBUG);

        let train_info =
            TrainInfo::new(corpus.display().to_string(), working_dir.display().to_string(), n_threads);

        BuildApp {
            train_info,
            corpus,
            working_dir,
            order,
            estimators,
            sentence_markers,
            n_threads,
            spill_threshold_keys,
            open_file_budget,
            keep_temp_files,
            log_to_console,
            debug,
        }
    }

    pub fn corpus(&self) -> &std::path::Path {
        &self.corpus
    }

    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn estimators(&self) -> &[EstimatorKind] {
        &self.estimators
    }

    pub fn sentence_markers(&self) -> bool {
        self.sentence_markers
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn spill_threshold_keys(&self) -> usize {
        self.spill_threshold_keys
    }

    pub fn open_file_budget(&self) -> usize {
        self.open_file_budget
    }

    pub fn keep_temp_files(&self) -> bool {
        self.keep_temp_files
    }

    pub fn log_to_console(&self) -> bool {
        self.log_to_console
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn train_info(&self) -> &TrainInfo {
        &self.train_info
    }

    pub fn train_info_mut(&mut self) -> &mut TrainInfo {
        &mut self.train_info
    }

    /// The union of absolute and continuation patterns every selected
    /// estimator declares as required, at `order` (spec §4.5 step 1).
    pub fn required_patterns(&self) -> Vec<Pattern> {
        crate::estimator::required_patterns_for(&self.estimators, self.order)
    }
}

impl Default for BuildApp {
    fn default() -> Self {
        Self::new()
    }
}

/// CLI surface for `glamtk-query`: loads a built store's Cache and answers
/// argmax/probability queries (spec §4.6, §4.7, §6).
pub struct QueryApp {
    working_dir: PathBuf,
    order: usize,
    estimators: Vec<EstimatorKind>,
    sentence_markers: bool,
    query_files: Vec<PathBuf>,
    interactive: bool,
    top_k: usize,
    log_to_console: bool,
    debug: bool,
}

impl QueryApp {
    pub fn new() -> Self {
        let matches = common_opts("glamtk-query")
            .arg(
                Arg::with_name(QUERY_FILE)
                    .long("query-file")
                    .value_name("FILE")
                    .help("Query file(s) to answer (one history per non-comment, non-blank line)")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1),
            )
            .arg(Arg::with_name(INTERACTIVE).long("interactive").help("Read queries from stdin"))
            .arg(
                Arg::with_name(TOP_K)
                    .long("top-k")
                    .value_name("K")
                    .help("Number of completions to return per query")
                    .takes_value(true)
                    .default_value("10"),
            )
            .get_matches();

        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let working_dir: PathBuf = matches.value_of(WORKING_DIR).unwrap().into();
        let order = matches.value_of(ORDER).map(|v| v.parse().or_exit("Cannot parse order", 1)).unwrap();
        let estimators = matches
            .values_of(ESTIMATOR)
            .unwrap()
            .map(|v| EstimatorKind::parse(v).or_exit("Cannot parse estimator", 1))
            .collect();
        let sentence_markers = matches.is_present(SENTENCE_MARKERS);
        let query_files: Vec<PathBuf> =
            matches.values_of(QUERY_FILE).map(|vs| vs.map(PathBuf::from).collect()).unwrap_or_default();
        let interactive = matches.is_present(INTERACTIVE);
        let top_k = matches.value_of(TOP_K).map(|v| v.parse().or_exit("Cannot parse top-k", 1)).unwrap();
        let log_to_console = matches.is_present(LOG_TO_CONSOLE);
        let debug = matches.is_present(DEBUG);

        if query_files.is_empty() && !interactive {
            eprintln!("Either --query-file or --interactive must be given");
            std::process::exit(1);
        }

        QueryApp {
            working_dir,
            order,
            estimators,
            sentence_markers,
            query_files,
            interactive,
            top_k,
            log_to_console,
            debug,
        }
    }

    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn estimators(&self) -> &[EstimatorKind] {
        &self.estimators
    }

    pub fn sentence_markers(&self) -> bool {
        self.sentence_markers
    }

    pub fn query_files(&self) -> &[PathBuf] {
        &self.query_files
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn log_to_console(&self) -> bool {
        self.log_to_console
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn required_patterns(&self) -> Vec<Pattern> {
        crate::estimator::required_patterns_for(&self.estimators, self.order)
    }
}

impl Default for QueryApp {
    fn default() -> Self {
        Self::new()
    }
}

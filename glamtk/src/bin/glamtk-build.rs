//! `glamtk-build`: drives the pipeline driver over a training corpus,
//! writing a WordIndex, corpus stats and every pattern store the selected
//! estimators require (spec §4.5, §6).

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use glamtk::app::BuildApp;
use glamtk_core::driver::{PipelineConfig, PipelineDriver};

fn init_logging(debug: bool, log_to_console: bool) {
    let level = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if !log_to_console {
        builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
    }
    builder.init();
}

fn append_log_line(working_dir: &std::path::Path, line: &str) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(working_dir.join("log")) {
        let _ = writeln!(f, "{}", line);
    }
}

fn main() {
    let mut app = BuildApp::new();
    init_logging(app.debug(), app.log_to_console());

    let patterns = app.required_patterns();
    info!(
        "building {} pattern(s) for estimator(s) {:?} at order {}",
        patterns.len(),
        app.estimators(),
        app.order()
    );

    let progress = ProgressBar::new(patterns.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} patterns"),
    );

    let config = PipelineConfig {
        sentence_markers: app.sentence_markers(),
        open_file_budget: app.open_file_budget(),
        spill_threshold_keys: app.spill_threshold_keys(),
        n_threads: app.n_threads(),
    };
    let driver = PipelineDriver::new(app.working_dir(), config);

    let start = Instant::now();
    let result = driver.run(app.corpus(), &patterns);
    progress.finish_and_clear();

    app.train_info_mut().set_end();

    match result {
        Ok(index) => {
            let elapsed = start.elapsed();
            let summary = format!(
                "built {} pattern(s), vocabulary {} words, {:.2}s",
                patterns.len(),
                index.vocab_size(),
                elapsed.as_secs_f64()
            );
            println!("{}", summary);
            append_log_line(app.working_dir(), &summary);
            if !app.keep_temp_files() {
                for pattern in &patterns {
                    let _ = glamtk_core::PatternStore::new(app.working_dir(), pattern.clone()).delete_split();
                }
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            append_log_line(app.working_dir(), &format!("error: {}", e));
            std::process::exit(e.exit_code());
        }
    }
}

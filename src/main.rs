use simplelog::{Config as LogConfig, LevelFilter, WriteLogger};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use umdl::engine::YtDlpEngine;
use umdl::session::Session;
use umdl::{config, Result};

const LOG_FILE: &str = "umdl.log";

fn init_logging() {
    match std::fs::File::create(LOG_FILE) {
        Ok(file) => {
            let _ = WriteLogger::init(LevelFilter::Info, LogConfig::default(), file);
        }
        Err(e) => eprintln!("logging disabled, cannot create {LOG_FILE}: {e}"),
    }
}

fn run() -> Result<()> {
    let config_path = PathBuf::from(config::CONFIG_FILE);
    let config = config::load(&config_path)?;
    log::info!(
        "config loaded: {} categories, {} workers",
        config.categories.len(),
        config.concurrency_limit()
    );

    let engine = YtDlpEngine::new(PathBuf::from("tools"));
    engine.ensure_available()?;

    let mut session = Session::new(config, config_path, Arc::new(engine));
    session.run()
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

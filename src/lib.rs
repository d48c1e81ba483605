pub mod cli;
pub mod error;
pub mod managers;
pub mod matching;
pub mod passages;
pub mod persistence;
pub mod session;
pub mod settings;

use clap::Parser;
use cli::CliArgs;

pub use error::{ReciteError, Result};
pub use managers::{SessionCommand, SessionManager};
pub use matching::{MatchDecider, MatchVerdict, PlatformClass, ThresholdProfile};
pub use passages::{HierarchicalText, Passage, PassageKey, PassageSource};
pub use persistence::{Identity, JsonFileStore, MemoryStore, ProgressStore, UserProgress};
pub use session::{ReadingState, SessionConfig, SessionController, SessionEffect, SpeechEngine};
pub use settings::ReaderSettings;

/// Initialise console logging. `RUST_LOG` wins when set; otherwise `info`, or
/// `debug` when `debug` is true.
pub fn init_logging(debug: bool) {
    let fallback = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => {
            builder.filter_level(fallback).parse_filters(&spec);
        }
        _ => {
            builder.filter_level(fallback);
        }
    }
    builder.format_timestamp_millis().format_target(false);

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}

pub fn run() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.debug);
    log::debug!("Parsed CLI arguments: {:?}", args);
    cli::execute(args)
}

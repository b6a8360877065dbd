use log::LevelFilter;
use std::str::FromStr;

/// Initialise the process-wide logger. Called once from `main` before any
/// thread is spawned so every worker inherits the same filter.
pub fn init(level: &str) {
    let filter = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_millis();
    logger.filter(None, filter);
    logger.init();
}

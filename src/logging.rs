// Logger initialisation

use log::LevelFilter;

/// Parse a configured level name (case-insensitive)
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse::<LevelFilter>().ok()
}

/// Initialise env_logger at `level`. `RUST_LOG`, when set, takes precedence.
/// Calling it again after a logger is installed is a no-op.
pub fn init(level: &str) {
    let filter = parse_level(level);

    let installed = env_logger::Builder::new()
        .filter_level(filter.unwrap_or(LevelFilter::Info))
        .parse_default_env()
        .try_init()
        .is_ok();

    if installed && filter.is_none() {
        log::warn!("Unknown log level {:?}, using info", level);
    }
}

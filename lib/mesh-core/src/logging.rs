//! Logging setup shared by mesh binaries
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map a level name or its numeric alias to a filter. Unknown values only
/// let errors through.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "1" | "error" => LevelFilter::ERROR,
        "2" | "warn" => LevelFilter::WARN,
        "3" | "info" => LevelFilter::INFO,
        "4" | "debug" => LevelFilter::DEBUG,
        "5" | "trace" => LevelFilter::TRACE,
        _ => LevelFilter::ERROR,
    }
}

/// Install the global fmt subscriber. `RUST_LOG`, when set, wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

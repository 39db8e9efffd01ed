use lectern_config::{LogConfig, LogFormat};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LEVELS: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Installs the global subscriber. Logs go to stderr; stdout is reserved for
/// the run summary. `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LogConfig, verbosity: i8) {
    let filter = EnvFilter::builder().with_default_directive(level(&config.level, verbosity).into()).from_env_lossy();
    let layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).with_writer(std::io::stderr).boxed(),
    };
    if let Err(err) = tracing_subscriber::registry().with(filter).with(layer).try_init() {
        eprintln!("could not install log subscriber: {err}");
    }
}

/// The configured level moved `verbosity` steps, clamped to the known levels.
/// Unrecognized names count as `info`.
fn level(configured: &str, verbosity: i8) -> LevelFilter {
    let configured = configured.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let position = LEVELS.iter().position(|l| *l == configured).unwrap_or(3) as i8;
    LEVELS[(position + verbosity).clamp(0, LEVELS.len() as i8 - 1) as usize]
}

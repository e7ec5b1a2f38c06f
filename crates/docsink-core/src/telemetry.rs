//! telemetry - docsink のログ出力
//!
//! stdout は CLI の最終カウント（JSON 1 行）専用なので、ログは常に stderr へ出す。

use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "DOCSINK_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Debug builds print human-readable lines with targets; release builds emit
/// one JSON object per event. The filter comes from `DOCSINK_LOG`, then
/// `RUST_LOG`, then `info`. Returns `false` if a subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = log_filter();

    let installed = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    };
    installed.is_ok()
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

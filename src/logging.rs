//! Logging setup using `tracing` + `tracing-subscriber`, with running tasks
//! rendered as `indicatif` spinners.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `KUMITATE_LOG` environment variable (an `EnvFilter` directive)
//! 3. default to `info`

use std::sync::LazyLock;

use indicatif::ProgressStyle;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const ENV_LOG: &str = "KUMITATE_LOG";

pub(crate) static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] {span_child_prefix}{msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

/// Install the global subscriber. Calling it a second time is a no-op.
pub fn init_logging(level: Option<tracing::Level>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let indicatif = IndicatifLayer::new();

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init();

    if let Err(e) = result {
        tracing::debug!("logging already initialised: {e}");
    }

    Ok(())
}

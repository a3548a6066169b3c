use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize logging from the `logging` configuration block.
///
/// `RUST_LOG` wins over `logging.level`. Output is JSON lines when
/// `logging.json` is set, pretty console output otherwise.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init()
            .wrap_err("Failed to install JSON tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install console tracing subscriber")?;
    }

    tracing::info!(
        "mountgate logging initialized with level: {}, json: {}",
        config.level,
        config.json
    );
    Ok(())
}

/// Shutdown tracing gracefully
pub fn shutdown_tracing() {
    // tracing-subscriber doesn't provide explicit shutdown; the fmt layer
    // writes synchronously.
    tracing::info!("mountgate tracing shutdown complete");
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, client: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        client.address = client,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create a span around one health probe
pub fn create_probe_span(child: &str, url: &str) -> tracing::Span {
    tracing::debug_span!("probe", child.name = child, probe.url = url)
}

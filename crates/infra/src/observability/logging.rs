use qrgen_domain::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level`. Returns `false` if a subscriber was
/// already installed, in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = build_filter(config);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = if config.json { builder.json().try_init() } else { builder.try_init() };

    result.is_ok()
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

use anyhow::Result;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Whether to enable structured logging (JSON format)
    pub structured: bool,
    /// Environment filter override (e.g., "backup_storages=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            structured: false,
            env_filter: None,
        }
    }
}

/// Initialize the global tracing subscriber
static INIT: Once = Once::new();

pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = setup_tracing(config);
    });
    result
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter = match &config.env_filter {
        Some(filter_str) => EnvFilter::try_new(filter_str)?,
        None => EnvFilter::from_default_env().add_directive(format!("backup_storages={}", config.level).parse()?),
    };
    Ok(filter)
}

fn setup_tracing(config: LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config)?;
    let registry = Registry::default().with(env_filter);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    if config.structured {
        registry.with(console_layer.json().with_ansi(false)).try_init()?;
    } else {
        registry.with(console_layer.with_ansi(true)).try_init()?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = ?config.level,
        structured = config.structured,
        "Logging initialized"
    );

    Ok(())
}

/// Storage event with the backend kind attached
#[macro_export]
macro_rules! log_storage_operation {
    ($level:ident, $operation:expr, $backend:expr, $($key:ident = $value:expr),*) => {
        tracing::$level!(
            operation = $operation,
            category = "storage",
            backend = %$backend,
            $($key = %$value,)*
        );
    };
}

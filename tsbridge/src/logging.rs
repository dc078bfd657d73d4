//! Logging utilities and configuration for tsbridge.
//!
//! The library itself only emits `tracing` events. Builders log the lowered
//! native query at `debug`, clauses a backend cannot express are reported at
//! `trace`/`debug`, and the aggregate driver reports per-backend failures at
//! `error`. Applications that do not bring their own subscriber can use
//! [`setup::init_logging`].

use tracing::Level;

/// Logging configuration for tsbridge components.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for tsbridge components
    pub base_level: Level,
    /// Whether to log every lowered native query
    pub log_queries: bool,
    /// Whether to log write payloads sent to transports
    pub log_writes: bool,
    /// Maximum length for logged query text (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_queries: true,
            log_writes: false,
            max_field_length: 512,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_queries: true,
            log_writes: true,
            max_field_length: 4096,
        }
    }

    /// Creates a minimal configuration for production with lowest overhead.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_queries: false,
            log_writes: false,
            max_field_length: 128,
        }
    }

    /// Whether `base_level` admits debug events.
    pub fn debug_enabled(&self) -> bool {
        // more verbose levels compare greater
        self.base_level >= Level::DEBUG
    }
}

/// Macro for performance-sensitive debug logging.
///
/// Per-point and per-file events go through this so their arguments are
/// only formatted when `base_level` is debug or more verbose.
#[macro_export]
macro_rules! perf_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional query logging.
#[macro_export]
macro_rules! log_query {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_queries {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
///
/// Cuts on a character boundary so multi-byte tag values never panic.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Utilities for setting up structured logging.
pub mod setup {
    use tracing::Level;

    /// Configuration for the process-wide subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for tsbridge components specifically
        pub crate_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                crate_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for production use.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                crate_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Creates a configuration for development use.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                crate_level: Level::TRACE,
                json_format: false,
                env_filter: None,
            }
        }

        /// Sets the log level for the application.
        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        /// Sets the log level for tsbridge components.
        pub fn with_crate_level(mut self, level: Level) -> Self {
            self.crate_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},tsbridge={}",
                    self.level.as_str().to_lowercase(),
                    self.crate_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tsbridge::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

//! Logging setup
//!
//! Everything in this crate logs through `tracing` with structured fields
//! (`invocation_id`, `command`, `path`). Nothing is printed until a
//! subscriber is installed; [`LogConfig`] installs a `tracing-subscriber`
//! registry, JSON to stdout by default.
//!
//! ```no_run
//! use slashgate::logging::{LogConfig, LogFormat, LogLevel};
//!
//! LogConfig::new()
//!     .level(LogLevel::Debug)
//!     .format(LogFormat::Pretty)
//!     .try_init()
//!     .ok();
//! ```

use crate::{Result, SlashError};
use std::io;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Minimum level to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event (default)
    Json,
    /// Multi-line, for local development
    Pretty,
    /// Single line, minimal
    Compact,
}

/// Stream to write to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Standard output (default)
    Stdout,
    /// Standard error
    Stderr,
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when neither `env_filter` nor `RUST_LOG` is set
    pub level: LogLevel,
    /// Line format
    pub format: LogFormat,
    /// Output stream
    pub output: LogOutput,
    /// Include the module path
    pub targets: bool,
    /// ANSI colors, ignored for JSON
    pub colors: bool,
    /// Filter directives such as `slashgate=debug,hyper=info`; overrides `level`
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            targets: true,
            colors: false,
            env_filter: None,
        }
    }
}

impl LogConfig {
    /// Default configuration: JSON to stdout at INFO
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback level
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the line format
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output stream
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Enable or disable module paths
    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    /// Set filter directives, overriding `RUST_LOG` and `level`
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Build the filter: explicit directives, then `RUST_LOG`, then `level`
    pub fn filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::default().add_directive(self.level.to_tracing_level().into());
        match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    /// Install the global subscriber.
    ///
    /// Fails if one is already installed.
    pub fn try_init(self) -> Result<()> {
        match self.output {
            LogOutput::Stdout => self.install(io::stdout),
            LogOutput::Stderr => self.install(io::stderr),
        }
    }

    /// Like [`try_init`](Self::try_init), ignoring an already-installed subscriber
    pub fn init(self) {
        let _ = self.try_init();
    }

    fn install<W>(&self, writer: W) -> Result<()>
    where
        W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
    {
        let filter = self.filter();
        let registry = tracing_subscriber::registry().with(filter);

        let result = match self.format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_target(self.targets)
                        .with_current_span(true),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_writer(writer)
                        .with_target(self.targets)
                        .with_ansi(self.colors),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .compact()
                        .with_writer(writer)
                        .with_target(self.targets)
                        .with_ansi(self.colors),
                )
                .try_init(),
        };

        result.map_err(|e| SlashError::Config(format!("Logging already initialised: {}", e)))
    }
}

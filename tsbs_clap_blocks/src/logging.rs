//! CLI flags for logging.
//!
//! Log output always goes to stderr; stdout is reserved for command output such as a generated
//! query corpus or pretty printed query responses.

use tracing_subscriber::{EnvFilter, filter::ParseError, util::TryInitError};

/// Filter used when neither `--log-filter` nor `-v` is given
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to install the log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Log message format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, single line
    #[default]
    Full,
    /// Shorter single line, without the span context
    Compact,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,reqwest=info` specifies debug logging for all modules
    /// except for `reqwest` which will only display info level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", global = true)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,hyper=info,reqwest=info'
    ///
    /// -vvv 'trace,hyper=info,reqwest=info'
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true
    )]
    pub log_verbose_count: u8,

    /// Logs: message format
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value_t = LogFormat::default(),
        value_enum,
        global = true
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    /// The effective filter directive
    pub fn filter_directive(&self) -> String {
        match self.log_verbose_count {
            0 => self
                .log_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            1 => "info".to_string(),
            2 => "debug,hyper=info,reqwest=info".to_string(),
            _ => "trace,hyper=info,reqwest=info".to_string(),
        }
    }

    pub fn env_filter(&self) -> Result<EnvFilter, Error> {
        let filter = self.filter_directive();
        EnvFilter::try_new(&filter).map_err(|source| Error::Filter { filter, source })
    }

    /// Install the global subscriber, writing to stderr
    pub fn install_global_subscriber(&self) -> Result<(), Error> {
        use tracing_subscriber::util::SubscriberInitExt;

        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.env_filter()?)
            .with_writer(std::io::stderr);
        match self.log_format {
            LogFormat::Full => builder.finish().try_init()?,
            LogFormat::Compact => builder.compact().finish().try_init()?,
        }
        Ok(())
    }
}

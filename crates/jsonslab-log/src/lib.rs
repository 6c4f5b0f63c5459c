//! Logging setup for the `jsonslab` crates.
//!
//! The library crates only emit `tracing` events. This crate installs the
//! subscriber that prints them, configured from the environment:
//!
//! - `JSONSLAB_LOG` selects what is printed, with `RUST_LOG` syntax
//!   (`debug`, `jsonslab_mem::arena=trace`). `RUST_LOG` is used as a fallback.
//! - `JSONSLAB_LOG_FORMAT` selects `text` (default) or `json` output.
//!
//! Output goes to stderr.
//!
//! # Example
//!
//! ```
//! use jsonslab_log::Level;
//!
//! // No-op unless JSONSLAB_LOG or RUST_LOG is set.
//! jsonslab_log::init();
//!
//! assert_eq!(Level::from_str("debug"), Ok(Level::Debug));
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

pub use tracing::{debug, error, info, trace, warn};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "JSONSLAB_LOG";

/// Environment variable holding the output format.
pub const LOG_FORMAT_ENV: &str = "JSONSLAB_LOG_FORMAT";

/// Log levels representing the severity/priority of log messages.
///
/// `Levels` are ordered from most severe (Error) to least severe (Trace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Error level - critical failures and errors
    Error = 0,
    /// Warning level - potentially harmful situations
    Warn = 1,
    /// Info level - informational messages
    Info = 2,
    /// Debug level - detailed diagnostic information
    Debug = 3,
    /// Trace level - most detailed tracing information
    Trace = 4,
}

impl Level {
    /// Returns the string representation of this log level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// Parses a string into a Level.
    ///
    /// # Example
    ///
    /// ```
    /// use jsonslab_log::Level;
    ///
    /// assert_eq!(Level::from_str("error"), Ok(Level::Error));
    /// assert_eq!(Level::from_str("INFO"), Ok(Level::Info));
    /// assert!(Level::from_str("invalid").is_err());
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }

    /// Returns the matching `tracing` level.
    pub const fn to_tracing(self) -> tracing::Level {
        match self {
            Level::Error => tracing::Level::ERROR,
            Level::Warn => tracing::Level::WARN,
            Level::Info => tracing::Level::INFO,
            Level::Debug => tracing::Level::DEBUG,
            Level::Trace => tracing::Level::TRACE,
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(self.as_str().to_lowercase())
    }
}

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (default).
    #[default]
    Text,
    /// Newline-delimited JSON objects.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` means text.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }

    /// Reads the format from `JSONSLAB_LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Builds a filter from `JSONSLAB_LOG`, falling back to `RUST_LOG`.
fn env_filter() -> Option<EnvFilter> {
    if let Ok(val) = std::env::var(LOG_ENV) {
        return Some(EnvFilter::builder().parse_lossy(val));
    }
    std::env::var("RUST_LOG")
        .is_ok()
        .then(EnvFilter::from_default_env)
}

/// Installs `filter` as the global subscriber. Returns false if a subscriber
/// was already installed.
fn install(filter: EnvFilter, format: LogFormat) -> bool {
    match format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_writer(std::io::stderr);
            Registry::default().with(filter).with(layer).try_init().is_ok()
        }
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    }
}

/// Installs the global subscriber from the environment.
///
/// Does nothing when neither `JSONSLAB_LOG` nor `RUST_LOG` is set, or when a
/// subscriber is already installed.
pub fn init() {
    if let Some(filter) = env_filter() {
        install(filter, LogFormat::from_env());
    }
}

/// Installs the global subscriber at a fixed level, ignoring `JSONSLAB_LOG`.
///
/// Returns false if a subscriber was already installed.
pub fn init_with_level(level: Level) -> bool {
    install(level.filter(), LogFormat::from_env())
}

/// Installs the global subscriber from a level name.
///
/// # Example
///
/// ```
/// jsonslab_log::set_level_from_str("debug").unwrap();
/// assert!(jsonslab_log::set_level_from_str("loud").is_err());
/// ```
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    let level = Level::from_str(s)?;
    init_with_level(level);
    Ok(())
}

/// Installs a subscriber that writes through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
/// Defaults to `debug` when `JSONSLAB_LOG` and `RUST_LOG` are unset.
pub fn init_for_tests() {
    let filter = env_filter().unwrap_or_else(|| Level::Debug.filter());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(Level::from_str("error"), Ok(Level::Error));
        assert_eq!(Level::from_str("WARN"), Ok(Level::Warn));
        assert_eq!(Level::from_str("Info"), Ok(Level::Info));
        assert_eq!(Level::from_str("DEBUG"), Ok(Level::Debug));
        assert_eq!(Level::from_str("trace"), Ok(Level::Trace));
        assert!(Level::from_str("invalid").is_err());
    }

    #[test]
    fn test_level_to_tracing() {
        assert_eq!(Level::Error.to_tracing(), tracing::Level::ERROR);
        assert_eq!(Level::Trace.to_tracing(), tracing::Level::TRACE);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("tree"), LogFormat::Text);
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        debug!(answer = 42, "logging after init");
        // A subscriber is installed now, so a second install is refused.
        assert!(!init_with_level(Level::Info));
    }
}

//! Logging setup
//!
//! Console logging through `tracing-subscriber`. The level comes from the
//! CLI flags; `CI_GATE_LOG` may override it with a full filter directive.

use tracing_subscriber::EnvFilter;

/// Variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "CI_GATE_LOG";

/// Log level configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `--verbose` wins over `--log-level`
    pub fn from_flags(level: Option<&str>, verbose: bool) -> Self {
        if verbose {
            return LogLevel::Debug;
        }
        level.and_then(Self::from_str).unwrap_or_default()
    }
}

/// Filter directive for `level`, unless the environment supplies one
pub fn filter_for(level: LogLevel, env_directive: Option<&str>) -> EnvFilter {
    env_directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("ci_gate={}", level.as_str())))
}

/// Initialize the logger with specified level
pub fn init_logger(level: LogLevel) {
    let directive = std::env::var(LOG_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level, directive.as_deref()))
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("unknown"), None);
    }

    #[test]
    fn test_verbose_overrides_level() {
        assert_eq!(LogLevel::from_flags(Some("warn"), true), LogLevel::Debug);
        assert_eq!(LogLevel::from_flags(Some("warn"), false), LogLevel::Warn);
        assert_eq!(LogLevel::from_flags(Some("bogus"), false), LogLevel::Info);
    }

    #[test]
    fn test_filter_directive() {
        let filter = filter_for(LogLevel::Warn, None);
        assert_eq!(filter.to_string().to_lowercase(), "ci_gate=warn");

        let filter = filter_for(LogLevel::Warn, Some("ci_gate::pipeline=trace"));
        assert_eq!(filter.to_string().to_lowercase(), "ci_gate::pipeline=trace");
    }
}

// Log config

/// Log verbosity level
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Disabled,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

/// Logger configuration
#[derive(Clone)]
pub struct LogConfig {
    // Prefix for all the logs
    pub prefix: String,

    // Error messages enabled?
    pub error_enabled: bool,

    // Warning messages enabled?
    pub warning_enabled: bool,

    // Info messages enabled?
    pub info_enabled: bool,

    // Debug messages enabled?
    pub debug_enabled: bool,

    // Trace messages enabled?
    pub trace_enabled: bool,
}

impl LogConfig {
    /// Creates a configuration enabling every level up to the given one
    pub fn with_level(level: LogLevel) -> LogConfig {
        LogConfig {
            prefix: "".to_string(),
            error_enabled: level >= LogLevel::Error,
            warning_enabled: level >= LogLevel::Warning,
            info_enabled: level >= LogLevel::Info,
            debug_enabled: level >= LogLevel::Debug,
            trace_enabled: level >= LogLevel::Trace,
        }
    }

    /// Creates a child configuration for a child logger
    ///
    /// The prefix parameter will be added to the parent's prefix,
    /// concatenated with a space
    ///
    /// Returns a new configuration for the child logger
    pub fn child_config(&self, prefix: &str) -> LogConfig {
        LogConfig {
            prefix: format!("{}{}", self.prefix, prefix),
            error_enabled: self.error_enabled,
            warning_enabled: self.warning_enabled,
            info_enabled: self.info_enabled,
            debug_enabled: self.debug_enabled,
            trace_enabled: self.trace_enabled,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::with_level(LogLevel::Info)
    }
}

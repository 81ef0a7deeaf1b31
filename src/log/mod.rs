// Log module

mod config;
mod logger;

pub use config::*;
pub use logger::*;

#[macro_export]
macro_rules! log_error {
    // Logs an ERROR message, only if the ERROR level is enabled
    // The first argument is the logger, the second the message
    ($logger:expr, $msg:expr) => {
        if $logger.config.error_enabled {
            $logger.log(&format!("[ERROR] {}", $msg));
        }
    };
}

#[macro_export]
macro_rules! log_warning {
    // Logs a WARNING message, only if the WARNING level is enabled
    // The first argument is the logger, the second the message
    ($logger:expr, $msg:expr) => {
        if $logger.config.warning_enabled {
            $logger.log(&format!("[WARNING] {}", $msg));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    // Logs an INFO message, only if the INFO level is enabled
    // The first argument is the logger, the second the message
    ($logger:expr, $msg:expr) => {
        if $logger.config.info_enabled {
            $logger.log(&format!("[INFO] {}", $msg));
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    // Logs a DEBUG message, only if the DEBUG level is enabled
    // The first argument is the logger, the second the message
    ($logger:expr, $msg:expr) => {
        if $logger.config.debug_enabled {
            $logger.log(&format!("[DEBUG] {}", $msg));
        }
    };
}

#[macro_export]
macro_rules! log_trace {
    // Logs a TRACE message, only if the TRACE level is enabled
    // The first argument is the logger, the second the message
    ($logger:expr, $msg:expr) => {
        if $logger.config.trace_enabled {
            $logger.log(&format!("[TRACE] {}", $msg));
        }
    };
}

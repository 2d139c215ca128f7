//! Errors surfaced by session bootstrap
//!
//! Everything else (lookup misses, capture misses, key mapping misses) is
//! absorbed and logged where it happens.

use std::process::ExitStatus;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("No free display number in :{first}..=:{last}")]
    NoFreeDisplay { first: u32, last: u32 },

    #[error("Failed to spawn display server '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Display server for :{display} exited during startup ({status})")]
    ServerExited { display: u32, status: ExitStatus },

    #[error("Display server for :{display} not ready after {attempts} attempts")]
    StartupTimeout { display: u32, attempts: u32 },

    #[error("Failed to connect to :{display}: {message}")]
    Connect { display: u32, message: String },
}

impl BootstrapError {
    /// Error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            BootstrapError::NoFreeDisplay { .. } => "NO_FREE_DISPLAY",
            BootstrapError::Spawn { .. } => "SERVER_SPAWN_FAILED",
            BootstrapError::ServerExited { .. } => "SERVER_EXITED",
            BootstrapError::StartupTimeout { .. } => "SERVER_STARTUP_TIMEOUT",
            BootstrapError::Connect { .. } => "CONNECT_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_error_display() {
        let error = BootstrapError::NoFreeDisplay { first: 1, last: 99 };
        assert_eq!(error.to_string(), "No free display number in :1..=:99");
        assert_eq!(error.error_code(), "NO_FREE_DISPLAY");

        let error = BootstrapError::StartupTimeout {
            display: 4,
            attempts: 50,
        };
        assert_eq!(
            error.to_string(),
            "Display server for :4 not ready after 50 attempts"
        );
        assert_eq!(error.error_code(), "SERVER_STARTUP_TIMEOUT");
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let error = BootstrapError::Spawn {
            binary: "Xvfb".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.error_code(), "SERVER_SPAWN_FAILED");
    }
}

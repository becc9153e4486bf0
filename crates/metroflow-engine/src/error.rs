//! Error types for the engine host binary.

/// Top-level error for the engine host.
///
/// Each variant wraps a subsystem error so that `main` can propagate
/// everything with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: metroflow_core::config::ConfigError,
    },

    /// The engine rejected a start or seeding request.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: metroflow_core::engine::EngineError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The tick loop task panicked or was cancelled.
    #[error("tick loop task failed: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Final report serialization failed.
    #[error("report serialization failed: {source}")]
    Report {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

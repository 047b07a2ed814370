//! Error types for cellmedic.
//!
//! Nothing here is fatal to the engine process. Errors surface from the two
//! external ports and from configuration loading; the orchestrator scopes
//! them to a single cycle or a single fault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedicError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry source error: {0}")]
    Telemetry(String),

    #[error("Resource control error: {0}")]
    Control(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MedicError {
    pub fn code(&self) -> i32 {
        match self {
            MedicError::Config(_) => 10,
            MedicError::Telemetry(_) => 20,
            MedicError::Control(_) => 30,
            MedicError::UnknownResource(_) => 31,
            MedicError::Io(_) => 40,
            MedicError::Toml(_) => 41,
            MedicError::Json(_) => 42,
            MedicError::Internal(_) => 99,
        }
    }
}

pub type Result<T> = std::result::Result<T, MedicError>;

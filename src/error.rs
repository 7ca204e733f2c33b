use std::path::PathBuf;

use thiserror::Error;

/// A settings value rejected at channel activation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown click mode '{0}'")]
pub struct UnknownModeError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty (example: 100-50-200)")]
    Empty,

    #[error("pattern contains a non-numeric delay '{0}' (example: 100-50-200)")]
    NotNumeric(String),
}

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("input injection is unavailable after shutdown")]
    ShutDown,

    // enigo 0.1 reports no failures, so only other sinks raise this
    #[allow(dead_code)]
    #[error("failed to inject click: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ClickerError {
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid trigger '{0}' in config")]
    BadTrigger(String),

    #[cfg_attr(not(feature = "hooks"), allow(dead_code))]
    #[error("global input listener failed: {0}")]
    Listener(String),

    #[error("headless mode needs the global listener (build with --features hooks)")]
    Headless,

    #[error("failed to start the settings window: {0}")]
    Window(String),

    #[error("failed to spawn the coordinator thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClickerError>;

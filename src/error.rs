use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArcScriptError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Discovery of '{path}' failed: {message}")]
    Discovery { path: String, message: String },
    #[error("Comparison error: {0}")]
    Comparison(String),
    #[error("Impermissible instruction: {message}")]
    Impermissible { message: String, instruction: String },
    #[error("Unsupported instruction: {0}")]
    Unsupported(String),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Pipeline error: {0}")]
    Pipeline(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl ArcScriptError {
    pub fn discovery(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery { path: path.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, ArcScriptError>;

// Helper conversions
impl From<config::ConfigError> for ArcScriptError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<serde_json::Error> for ArcScriptError {
    fn from(e: serde_json::Error) -> Self { Self::Execution(e.to_string()) }
}
impl From<tokio::task::JoinError> for ArcScriptError {
    fn from(e: tokio::task::JoinError) -> Self { Self::Execution(format!("task failed: {e}")) }
}
impl<T> From<std::sync::PoisonError<T>> for ArcScriptError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}

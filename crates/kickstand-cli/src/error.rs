//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] kickstand_common::Error),

    #[error("required tool '{tool}' not found on PATH. {hint}")]
    MissingTool { tool: String, hint: String },

    #[error("stage '{stage}' failed: {cause}")]
    StageFailed { stage: String, cause: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub fn missing_tool(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::MissingTool {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    pub fn stage_failed(stage: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::StageFailed {
            stage: stage.into(),
            cause: cause.to_string(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// The stage name, if this error came out of the stage runner
    pub fn stage(&self) -> Option<&str> {
        match self {
            Error::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

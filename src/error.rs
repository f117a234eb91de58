use serde::Serialize;
use thiserror::Error;

/// Coarse failure category reported back to the caller of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    InvalidRequest,
    UpstreamError,
    MalformedResponse,
    AssemblyError,
    VoiceCatalogUnavailable,
    IoError,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{service} request failed{}: {message}", status_suffix(.status))]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("malformed {service} response: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },

    #[error("media assembly failed: {0}")]
    Assembly(String),

    #[error("voice catalog unavailable: {0}")]
    VoiceCatalogUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::ConfigError,
            PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::Upstream { .. } => ErrorKind::UpstreamError,
            PipelineError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            PipelineError::Assembly(_) => ErrorKind::AssemblyError,
            PipelineError::VoiceCatalogUnavailable(_) => ErrorKind::VoiceCatalogUnavailable,
            PipelineError::Io(_) => ErrorKind::IoError,
        }
    }

    pub(crate) fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        PipelineError::MalformedResponse {
            service,
            message: message.into(),
        }
    }

    pub(crate) fn upstream(service: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        PipelineError::Upstream {
            service,
            status,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

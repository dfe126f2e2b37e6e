use std::fmt;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification of a [`PipelineError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ImageLoad,
    EncoderProtocol,
    Encoder,
    Mux,
    Io,
    Cancelled,
    Task,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::ImageLoad => "ImageLoadError",
            ErrorKind::EncoderProtocol => "EncoderProtocolError",
            ErrorKind::Encoder => "EncoderError",
            ErrorKind::Mux => "MuxError",
            ErrorKind::Io => "IOError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::Task => "TaskError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Empty input or a configuration value out of range.
    #[error("invalid pipeline input: {0}")]
    Validation(String),

    #[error("failed to load image #{index} ({locator}): {source:#}")]
    ImageLoad {
        index: usize,
        locator: String,
        #[source]
        source: anyhow::Error,
    },

    /// The encoder broke the drain protocol (duplicate format, missing buffer, stall...).
    #[error("encoder protocol violation: {0}")]
    EncoderProtocol(String),

    #[error("encoder failure: {0:#}")]
    Encoder(#[source] anyhow::Error),

    /// Sample written outside the started/not-finalized window.
    #[error("muxer misuse: {0}")]
    Mux(String),

    #[error("container write failure: {0:#}")]
    Io(#[source] anyhow::Error),

    #[error("pipeline cancelled before image #{0}")]
    Cancelled(usize),

    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::ImageLoad { .. } => ErrorKind::ImageLoad,
            PipelineError::EncoderProtocol(_) => ErrorKind::EncoderProtocol,
            PipelineError::Encoder(_) => ErrorKind::Encoder,
            PipelineError::Mux(_) => ErrorKind::Mux,
            PipelineError::Io(_) => ErrorKind::Io,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
            PipelineError::Task(_) => ErrorKind::Task,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        PipelineError::EncoderProtocol(msg.into())
    }

    pub(crate) fn mux(msg: impl Into<String>) -> Self {
        PipelineError::Mux(msg.into())
    }
}

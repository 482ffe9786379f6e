use std::path::PathBuf;

/// Failures raised while probing media with ffmpeg/ffprobe
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed for {path}: {message}")]
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("Unable to fingerprint {path}: {reason}")]
    Fingerprint { path: PathBuf, reason: String },

    #[error("Malformed probe output: {0}")]
    Parse(String),
}

/// Configuration problems detected at load or validation time
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid chapter pattern for {field}: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

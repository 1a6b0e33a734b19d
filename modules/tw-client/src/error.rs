use thiserror::Error;

pub type Result<T> = std::result::Result<T, TwError>;

#[derive(Debug, Error)]
pub enum TwError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error in {resource} at line {line}: {message}")]
    Parse {
        resource: &'static str,
        line: usize,
        message: String,
    },
}

impl TwError {
    pub(crate) fn parse(resource: &'static str, line: usize, message: impl Into<String>) -> Self {
        TwError::Parse {
            resource,
            line,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TwError {
    fn from(err: reqwest::Error) -> Self {
        TwError::Network(err.to_string())
    }
}

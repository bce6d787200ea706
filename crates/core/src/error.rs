use thiserror::Error;

pub type OutreachResult<T> = Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),
}

impl From<config::ConfigError> for OutreachError {
    fn from(e: config::ConfigError) -> Self {
        OutreachError::Config(e.to_string())
    }
}

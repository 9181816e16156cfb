use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaseError {
    #[error("Config error: {0}")]
    Config(String),
}

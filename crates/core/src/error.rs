use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid config value for {key}: {value}")]
    Config { key: String, value: String },
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Send mode is `webhook` or credentials are missing.
    #[error("Feishu API service not enabled")]
    Disabled,

    #[error("no receive target: neither request nor config names one")]
    MissingTarget,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Non-zero `code` in an OpenAPI response body.
    #[error("feishu api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("{0}")]
    Message(String),
}

impl larkin_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

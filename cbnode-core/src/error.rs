use thiserror::Error;

pub type Result<T> = std::result::Result<T, CbError>;

#[derive(Debug, Error)]
pub enum CbError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} failed with status {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("invalid admin credentials entry: {0}")]
    InvalidCredentials(String),

    #[error("host error: {0}")]
    Host(String),

    #[error("{operation} giving up after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },
}

impl CbError {
    /// Body of a non-2xx admin API response, if this error carries one.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}

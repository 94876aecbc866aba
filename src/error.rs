pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    AsyncIo(#[from] tokio::io::Error),
    #[error("missing configuration {0}")]
    Config(&'static str),
    #[error("unknown smtp provider {0}")]
    UnknownProvider(String),
    #[error("invalid address {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp relay error {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("relay rejected message {0}")]
    Relay(String),
    #[error("web server error {0}")]
    WebServer(String),
}

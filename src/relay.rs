use futures::future::BoxFuture;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    provider::SenderCredentials,
};

/// something that hands a finished message to an upstream mail server
pub trait Relay: Send + Sync {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>>;
}

/// builds an authenticated relay for a sender
pub trait Connector: Send + Sync {
    fn connect(&self, sender: &SenderCredentials) -> Result<Arc<dyn Relay>>;
}

impl Relay for AsyncSmtpTransport<Tokio1Executor> {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let response = AsyncTransport::send(self, message).await?;

            if response.is_positive() {
                Ok(())
            } else {
                Err(Error::Relay(response.code().to_string()))
            }
        })
    }
}

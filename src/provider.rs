use lettre::{
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, Tokio1Executor,
};
use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    error::{Error, Result},
    relay::{Connector, Relay},
};

const SUBMISSION_PORT: u16 = 587;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    Gmail,
    GmailOAuth2,
    Zoho,
    SendGrid,
    Custom { host: String, port: u16 },
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Provider::Gmail),
            "gmail-oauth2" | "gmail_oauth2" => Ok(Provider::GmailOAuth2),
            "zoho" => Ok(Provider::Zoho),
            "sendgrid" => Ok(Provider::SendGrid),
            other => Err(Error::UnknownProvider(other.to_owned())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gmail => write!(f, "gmail"),
            Provider::GmailOAuth2 => write!(f, "gmail-oauth2"),
            Provider::Zoho => write!(f, "zoho"),
            Provider::SendGrid => write!(f, "sendgrid"),
            Provider::Custom { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

impl Provider {
    pub fn relay_host(&self) -> &str {
        match self {
            Provider::Gmail | Provider::GmailOAuth2 => "smtp.gmail.com",
            Provider::Zoho => "smtp.zoho.in",
            Provider::SendGrid => "smtp.sendgrid.net",
            Provider::Custom { host, .. } => host,
        }
    }

    pub fn relay_port(&self) -> u16 {
        match self {
            Provider::Custom { port, .. } => *port,
            _ => SUBMISSION_PORT,
        }
    }

    /// SMTP AUTH user name and secret for a sender on this provider
    pub fn credentials(&self, sender: &SenderCredentials) -> Credentials {
        match self {
            // SendGrid authenticates every account with the literal user "apikey"
            Provider::SendGrid => Credentials::new("apikey".to_owned(), sender.secret.clone()),
            _ => Credentials::new(sender.email.clone(), sender.secret.clone()),
        }
    }

    pub fn mechanisms(&self) -> Vec<Mechanism> {
        match self {
            Provider::GmailOAuth2 => vec![Mechanism::Xoauth2],
            _ => vec![Mechanism::Plain, Mechanism::Login],
        }
    }

    /// build a STARTTLS transport authenticated as `sender`
    pub fn transport(
        &self,
        sender: &SenderCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(self.relay_host())?
            .port(self.relay_port())
            .credentials(self.credentials(sender))
            .authentication(self.mechanisms())
            .build();

        Ok(transport)
    }
}

/// account used to authenticate against the relay, submitted with every job
#[derive(Clone)]
pub struct SenderCredentials {
    pub email: String,
    /// app password, API key or OAuth2 access token depending on the provider
    pub secret: String,
}

impl fmt::Debug for SenderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderCredentials")
            .field("email", &self.email)
            .field("secret", &"***")
            .finish()
    }
}

/// connector producing lettre SMTP transports for the configured provider
pub struct SmtpConnector {
    provider: Provider,
}

impl SmtpConnector {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Connector for SmtpConnector {
    fn connect(&self, sender: &SenderCredentials) -> Result<Arc<dyn Relay>> {
        let relay: Arc<dyn Relay> = Arc::new(self.provider.transport(sender)?);

        Ok(relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> SenderCredentials {
        SenderCredentials {
            email: "ops@example.org".to_owned(),
            secret: "app-password".to_owned(),
        }
    }

    #[test]
    fn parse_provider_names() {
        assert_eq!("Gmail".parse::<Provider>().unwrap(), Provider::Gmail);
        assert_eq!(" zoho ".parse::<Provider>().unwrap(), Provider::Zoho);
        assert_eq!("sendgrid".parse::<Provider>().unwrap(), Provider::SendGrid);
        assert_eq!(
            "gmail-oauth2".parse::<Provider>().unwrap(),
            Provider::GmailOAuth2
        );
        assert!(matches!(
            "mailgun".parse::<Provider>(),
            Err(Error::UnknownProvider(name)) if name == "mailgun"
        ));
    }

    #[test]
    fn relay_endpoints() {
        assert_eq!(Provider::Zoho.relay_host(), "smtp.zoho.in");
        assert_eq!(Provider::GmailOAuth2.relay_host(), "smtp.gmail.com");
        assert_eq!(Provider::SendGrid.relay_port(), 587);

        let custom = Provider::Custom {
            host: "mail.internal".to_owned(),
            port: 2525,
        };
        assert_eq!(custom.relay_host(), "mail.internal");
        assert_eq!(custom.relay_port(), 2525);
        assert_eq!(custom.to_string(), "mail.internal:2525");
    }

    #[test]
    fn sendgrid_uses_apikey_user() {
        let credentials = Provider::SendGrid.credentials(&sender());
        let expected = Credentials::new("apikey".to_owned(), "app-password".to_owned());

        assert_eq!(credentials, expected);
    }

    #[test]
    fn oauth2_uses_xoauth2() {
        assert_eq!(Provider::GmailOAuth2.mechanisms(), vec![Mechanism::Xoauth2]);
        assert!(!Provider::Gmail.mechanisms().contains(&Mechanism::Xoauth2));
    }

    #[test]
    fn secret_is_not_logged() {
        let debug = format!("{:?}", sender());

        assert!(debug.contains("ops@example.org"));
        assert!(!debug.contains("app-password"));
    }

    #[tokio::test]
    async fn builds_transport_without_connecting() {
        assert!(Provider::Gmail.transport(&sender()).is_ok());
    }
}

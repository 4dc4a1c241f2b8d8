//! Email transport over SMTP with implicit TLS.

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use crate::config::SmtpConfig;
use crate::domain::{Channel, NotificationMessage};
use crate::worker::transport::{DeliveryError, Transport, render_text};
use crate::{Error, Result};

const DEFAULT_SUBJECT: &str = "Notification";

pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        crate::utils::http_client::install_rustls_provider();

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| Error::config(format!("invalid sender {:?}: {}", config.from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| Error::config(format!("invalid SMTP relay {}: {}", config.host, e)))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn build_message(&self, message: &NotificationMessage) -> std::result::Result<Message, DeliveryError> {
        let to: Mailbox = message.recipient.parse().map_err(|e| {
            DeliveryError::Permanent(format!("invalid recipient {:?}: {}", message.recipient, e))
        })?;

        let subject = message
            .subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT);

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(render_text(&NotificationMessage {
                subject: None,
                ..message.clone()
            }))
            .map_err(|e| DeliveryError::Permanent(format!("cannot build email: {}", e)))
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, message: &NotificationMessage) -> std::result::Result<(), DeliveryError> {
        let email = self.build_message(message)?;

        match self.mailer.send(email).await {
            Ok(response) => {
                debug!(id = %message.id, code = %response.code(), "Email accepted by relay");
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                warn!(id = %message.id, error = %e, "SMTP relay rejected email");
                Err(DeliveryError::Permanent(format!("SMTP rejected: {}", e)))
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "SMTP send failed");
                Err(DeliveryError::Transient(format!("SMTP failure: {}", e)))
            }
        }
    }
}

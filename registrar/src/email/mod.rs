//! Email service for registration notices and campaigns.
//!
//! One [`EmailService`] is built at startup and shared (`Arc`) by the
//! notification worker and the campaign sender.

pub mod campaigns;

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{EmailConfig, EmailTransportConfig};
use crate::errors::Error;
use crate::notifications::RegistrationSnapshot;
use crate::types::RegistrationId;
use crate::webhooks::WebhookEventType;

const CONFIRMED_TEMPLATE: &str = "registration_confirmed.html";
const CANCELLED_TEMPLATE: &str = "registration_cancelled.html";

pub struct EmailService {
    transport: EmailTransport,
    templates: Environment<'static>,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
    public_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

/// Everything needed to render a registration email, stored as the payload of
/// an `email` outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEmail {
    pub to: String,
    pub registration_id: RegistrationId,
    pub event_name: String,
    pub ticket_name: String,
    pub ticket_price: String,
}

impl RegistrationEmail {
    pub fn from_snapshot(snapshot: &RegistrationSnapshot<'_>) -> Self {
        Self {
            to: snapshot.registration.email.clone(),
            registration_id: snapshot.registration.id,
            event_name: snapshot.event.name.clone(),
            ticket_name: snapshot.ticket.name.clone(),
            ticket_price: snapshot.ticket.price.to_string(),
        }
    }
}

impl EmailService {
    pub fn new(email_config: &EmailConfig, public_url: &str) -> Result<Self, Error> {
        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP relay configured without TLS");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("set up SMTP relay: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("prepare mail directory {path}: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let mut templates = Environment::new();
        templates
            .add_template(CONFIRMED_TEMPLATE, include_str!("../../templates/email/registration_confirmed.html"))
            .and_then(|_| templates.add_template(CANCELLED_TEMPLATE, include_str!("../../templates/email/registration_cancelled.html")))
            .map_err(|e| Error::Internal {
                operation: format!("load email templates: {e}"),
            })?;

        Ok(Self {
            transport,
            templates,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn send_registration_email(&self, event_type: WebhookEventType, email: &RegistrationEmail) -> Result<(), Error> {
        let (subject, body) = self.render_registration_email(event_type, email)?;
        self.send_email(&email.to, &subject, &body).await
    }

    fn render_registration_email(&self, event_type: WebhookEventType, email: &RegistrationEmail) -> Result<(String, String), Error> {
        let (template, subject) = match event_type {
            WebhookEventType::RegistrationConfirmed => (CONFIRMED_TEMPLATE, format!("You're registered for {}", email.event_name)),
            WebhookEventType::RegistrationCancelled => (CANCELLED_TEMPLATE, format!("Registration cancelled: {}", email.event_name)),
        };

        let body = self
            .templates
            .get_template(template)
            .and_then(|t| {
                t.render(context! {
                    event_name => &email.event_name,
                    ticket_name => &email.ticket_name,
                    ticket_price => &email.ticket_price,
                    registration_id => email.registration_id.to_string(),
                    registration_url => format!("{}/registrations/{}", self.public_url, email.registration_id),
                })
            })
            .map_err(|e| Error::Internal {
                operation: format!("render {template}: {e}"),
            })?;

        Ok((subject, body))
    }

    pub async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("read sender address: {e}"),
            })?;

        let to = to_email.parse::<Mailbox>().map_err(|e| Error::BadRequest {
            message: format!("Invalid recipient address {to_email}: {e}"),
        })?;

        let mut builder = Message::builder().from(from).to(to).subject(subject).header(ContentType::TEXT_HTML);
        if let Some(reply_to) = &self.reply_to {
            let reply_to = reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder.body(body.to_string()).map_err(|e| Error::Internal {
            operation: format!("assemble email message: {e}"),
        })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("deliver over SMTP: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("write mail file: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn file_service(dir: &Path) -> EmailService {
        let config = EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.to_string_lossy().to_string(),
            },
            reply_to: Some("help@example.com".to_string()),
            ..Default::default()
        };
        EmailService::new(&config, "https://tickets.example.com/").unwrap()
    }

    fn email() -> RegistrationEmail {
        RegistrationEmail {
            to: "ada@example.com".to_string(),
            registration_id: Uuid::nil(),
            event_name: "RustConf".to_string(),
            ticket_name: "General".to_string(),
            ticket_price: "49.50".to_string(),
        }
    }

    #[test]
    fn test_confirmation_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let service = file_service(dir.path());

        let (subject, body) = service
            .render_registration_email(WebhookEventType::RegistrationConfirmed, &email())
            .unwrap();

        assert_eq!(subject, "You're registered for RustConf");
        assert!(body.contains("Ticket: General"));
        assert!(body.contains("49.50"));
        // .html templates are autoescaped, so the link's slashes come out as entities
        assert!(body.contains("https:&#x2f;&#x2f;tickets.example.com&#x2f;registrations&#x2f;00000000-0000-0000-0000-000000000000"));
        assert!(!body.contains("https://"));
    }

    #[test]
    fn test_cancellation_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let service = file_service(dir.path());

        let (subject, body) = service
            .render_registration_email(WebhookEventType::RegistrationCancelled, &email())
            .unwrap();

        assert_eq!(subject, "Registration cancelled: RustConf");
        assert!(body.contains("General registration for RustConf has been cancelled"));
    }

    #[tokio::test]
    async fn test_file_transport_writes_message() {
        let dir = tempfile::tempdir().unwrap();
        let service = file_service(dir.path());

        service
            .send_registration_email(WebhookEventType::RegistrationConfirmed, &email())
            .await
            .unwrap();

        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let service = file_service(dir.path());

        let err = service.send_email("not an address", "Hi", "<p>Hi</p>").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}

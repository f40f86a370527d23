//! SMTP delivery of composed notifications via `lettre`.

use crate::config::Config;
use facematch_core::notify::{DispatchError, NotificationDispatcher, NotificationPayload};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;

/// STARTTLS + login relay, one message per dispatch.
pub struct SmtpDispatcher {
    transport: SmtpTransport,
}

impl SmtpDispatcher {
    pub fn new(host: &str, port: u16, user: String, pass: String) -> Result<Self, DispatchError> {
        let transport = SmtpTransport::starttls_relay(host)
            .map_err(|e| DispatchError::Transport(e.to_string()))?
            .port(port)
            .credentials(Credentials::new(user, pass))
            .build();
        Ok(Self { transport })
    }
}

impl NotificationDispatcher for SmtpDispatcher {
    fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let message = build_message(payload)?;
        self.transport
            .send(&message)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP credentials are configured; every dispatch is refused.
pub struct DisabledDispatcher;

impl NotificationDispatcher for DisabledDispatcher {
    fn dispatch(&self, _payload: &NotificationPayload) -> Result<(), DispatchError> {
        Err(DispatchError::NotConfigured)
    }
}

/// Pick the dispatcher the configuration allows.
pub fn dispatcher_from_config(config: &Config) -> Arc<dyn NotificationDispatcher> {
    let Some(creds) = &config.smtp else {
        tracing::warn!("SMTP credentials not set; notifications will not be sent");
        return Arc::new(DisabledDispatcher);
    };

    match SmtpDispatcher::new(
        &config.smtp_host,
        config.smtp_port,
        creds.user.clone(),
        creds.pass.clone(),
    ) {
        Ok(dispatcher) => {
            tracing::info!(host = %config.smtp_host, port = config.smtp_port, "SMTP dispatcher ready");
            Arc::new(dispatcher)
        }
        Err(e) => {
            tracing::warn!(host = %config.smtp_host, error = %e, "SMTP relay unusable; notifications disabled");
            Arc::new(DisabledDispatcher)
        }
    }
}

/// `multipart/related`: an HTML alternative followed by one inline part per image.
pub fn build_message(payload: &NotificationPayload) -> Result<Message, DispatchError> {
    let from = parse_mailbox(&payload.from)?;
    let to = parse_mailbox(&payload.to)?;

    let mut related = MultiPart::related().multipart(
        MultiPart::alternative().singlepart(SinglePart::html(payload.html_body.clone())),
    );
    for image in &payload.attachments {
        let content_type = ContentType::parse(&image.content_type)
            .map_err(|e| DispatchError::Build(format!("{}: {e}", image.file_name)))?;
        related = related.singlepart(
            Attachment::new_inline(image.content_id.clone()).body(image.data.clone(), content_type),
        );
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(payload.subject.clone())
        .multipart(related)
        .map_err(|e| DispatchError::Build(e.to_string()))
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DispatchError> {
    address.parse().map_err(|e: lettre::address::AddressError| DispatchError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

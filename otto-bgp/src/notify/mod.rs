//! SMTP dispatch for NETCONF lifecycle events. Sending is always
//! best-effort: a failed send is logged and swallowed, never propagated
//! into the applier.

use crate::config::SmtpConfig;
use crate::event::{DeliveryStatus, NotificationEvent};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{error, warn};

pub struct NotificationSink {
    config: SmtpConfig,
}

impl NotificationSink {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build and send one message for `event`. Never returns an error to
    /// the caller; failures are logged and reported only as a status.
    /// `Pending` means dispatch is disabled and nothing was attempted.
    pub fn send_event(&self, event: &NotificationEvent) -> DeliveryStatus {
        if !self.config.enabled {
            return DeliveryStatus::Pending;
        }

        let message = match self.build_message(event) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to build notification message");
                return DeliveryStatus::Failed;
            }
        };

        match self.build_transport() {
            Ok(transport) => match transport.send(&message) {
                Ok(_) => {
                    tracing::debug!(event = event.event_type.as_str(), hostname = %event.hostname, "notification sent");
                    DeliveryStatus::Delivered
                }
                Err(err) => {
                    error!(error = %err, "failed to send notification");
                    DeliveryStatus::Failed
                }
            },
            Err(err) => {
                error!(error = %err, "failed to build smtp transport");
                DeliveryStatus::Failed
            }
        }
    }

    fn subject(&self, event: &NotificationEvent) -> String {
        let outcome = if event.success { "SUCCESS" } else { "FAILED" };
        format!(
            "{} {} - {}",
            self.config.subject_prefix,
            event.event_type.as_str(),
            outcome
        )
    }

    fn body(&self, event: &NotificationEvent) -> String {
        format!(
            "event: {}\nhostname: {}\nsuccess: {}\ntimestamp: {}\ndetails: {}\n",
            event.event_type.as_str(),
            event.hostname,
            event.success,
            event.timestamp.to_rfc3339(),
            event.details,
        )
    }

    fn build_message(&self, event: &NotificationEvent) -> Result<Message, String> {
        let from: Mailbox = self
            .config
            .from
            .as_deref()
            .ok_or("smtp.from is not configured")?
            .parse()
            .map_err(|err| format!("invalid from address: {err}"))?;

        if self.config.to.is_empty() {
            return Err("smtp.to has no recipients".to_string());
        }

        let mut builder = Message::builder().from(from).subject(self.subject(event));
        for to in &self.config.to {
            let mailbox: Mailbox = to.parse().map_err(|err| format!("invalid to address '{to}': {err}"))?;
            builder = builder.to(mailbox);
        }
        for cc in &self.config.cc {
            let mailbox: Mailbox = cc.parse().map_err(|err| format!("invalid cc address '{cc}': {err}"))?;
            builder = builder.cc(mailbox);
        }

        builder
            .body(self.body(event))
            .map_err(|err| format!("failed to assemble message: {err}"))
    }

    fn build_transport(&self) -> Result<SmtpTransport, String> {
        let server = self.config.server.as_deref().ok_or("smtp.server is not configured")?;

        let mut builder = if self.config.tls {
            SmtpTransport::relay(server).map_err(|err| err.to_string())?
        } else {
            SmtpTransport::builder_dangerous(server)
        };
        builder = builder.port(self.config.port);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.0.clone()));
        }

        Ok(builder.build())
    }
}

//! Availability notifications.
//!
//! The flush path publishes events into a bounded in-memory channel and
//! never blocks on delivery; a dedicated sender task drains the channel
//! after the transaction has committed. Push and email are independent
//! best-effort channels: one failing does not suppress the other, nothing
//! is retried, and anything lost is re-detected by the next scan.

use crate::config::Config;
use crate::db::Database;
use crate::models::NotificationEvent;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// Producer half handed to the flush paths.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotifierHandle {
    /// Enqueue without blocking. A full channel drops the event; the
    /// domain stays available, so the next scan raises it again.
    pub fn publish(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Notification channel full; dropping event for {}", event.name);
                metrics::counter!("sentry_notifications_dropped_total").increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("Notification sink gone; dropping event for {}", event.name);
            }
        }
    }

    /// A handle whose events go nowhere, for paths that run without a
    /// sender task (tests, one-shot CLI runs).
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

pub fn channel() -> (NotifierHandle, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (NotifierHandle { tx }, rx)
}

/// Consumer half: delivers each event over ntfy and, when configured, SMTP.
pub struct NotifySink {
    client: reqwest::Client,
    ntfy_url: String,
    mailer: Option<Mailer>,
    db: Database,
}

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl NotifySink {
    pub fn new(config: &Config, db: Database) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("domain-sentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("notification HTTP client");

        let ntfy_url = format!(
            "{}/{}",
            config.ntfy_server.trim_end_matches('/'),
            config.ntfy_topic
        );

        let mailer = Self::build_mailer(config);
        if mailer.is_none() && config.smtp_enabled() {
            warn!("SMTP configured but unusable; email notifications disabled");
        }

        Self {
            client,
            ntfy_url,
            mailer,
            db,
        }
    }

    fn build_mailer(config: &Config) -> Option<Mailer> {
        let host = config.smtp_host.as_deref()?;
        let from: Mailbox = config.smtp_from.as_deref()?.parse().ok()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .ok()?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Some(Mailer {
            transport: builder.build(),
            from,
        })
    }

    /// Drain the channel until every producer handle is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<NotificationEvent>) {
        info!("Notification sink running (ntfy topic: {})", self.ntfy_url);
        while let Some(event) = rx.recv().await {
            self.deliver(&event).await;
        }
        debug!("Notification sink shutting down");
    }

    async fn deliver(&self, event: &NotificationEvent) {
        let body = event_body(event);
        // Channels are independent; neither outcome gates the other.
        tokio::join!(self.send_push(event, &body), self.send_email(event, &body));
    }

    async fn send_push(&self, event: &NotificationEvent, body: &str) {
        match self
            .client
            .post(&self.ntfy_url)
            .header("Title", "Domain available")
            .body(body.to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => {
                metrics::counter!("sentry_notifications_total", "channel" => "ntfy").increment(1);
                debug!("Pushed availability alert for {}", event.name);
            }
            Err(e) => {
                warn!("ntfy delivery failed for {}: {e}", event.name);
            }
        }
    }

    async fn send_email(&self, event: &NotificationEvent, body: &str) {
        let Some(mailer) = &self.mailer else { return };

        // Email goes to whoever tracks the domain; without a resolvable
        // owner address there is nothing to send.
        let recipient = match self.db.owner_email(event.domain_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                debug!("No owner email for domain {}; skipping mail", event.name);
                return;
            }
            Err(e) => {
                warn!("Owner lookup failed for {}: {e}", event.name);
                return;
            }
        };
        let Ok(to) = recipient.parse::<Mailbox>() else {
            warn!("Unparseable owner email for {}", event.name);
            return;
        };

        let message = Message::builder()
            .from(mailer.from.clone())
            .to(to)
            .subject(format!("{} is available", event.name))
            .body(body.to_string());

        match message {
            Ok(message) => match mailer.transport.send(message).await {
                Ok(_) => {
                    metrics::counter!("sentry_notifications_total", "channel" => "smtp")
                        .increment(1);
                }
                Err(e) => warn!("SMTP delivery failed for {}: {e}", event.name),
            },
            Err(e) => warn!("Failed to build mail for {}: {e}", event.name),
        }
    }
}

fn event_body(event: &NotificationEvent) -> String {
    format!(
        "{} became available at {}",
        event.name,
        event.observed_at.format("%Y-%m-%d %H:%M UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> NotificationEvent {
        NotificationEvent {
            domain_id: 7,
            name: "expired.example".to_string(),
            observed_at: chrono::Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn body_names_the_domain_and_instant() {
        let body = event_body(&event());
        assert!(body.contains("expired.example"));
        assert!(body.contains("2026-08-01 12:30 UTC"));
    }

    #[tokio::test]
    async fn publish_never_blocks_when_channel_is_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NotifierHandle { tx };
        // Second publish hits a full channel and must return immediately.
        handle.publish(event());
        handle.publish(event());
    }

    #[tokio::test]
    async fn events_flow_through_the_channel_in_order_of_send() {
        let (handle, mut rx) = channel();
        handle.publish(event());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.domain_id, 7);
        assert_eq!(received.name, "expired.example");
    }

    #[tokio::test]
    async fn disconnected_handle_swallows_events() {
        let handle = NotifierHandle::disconnected();
        handle.publish(event());
    }
}

use crate::config::model::MailBlock;
use crate::core::execution::Execution;
use crate::middleware::{Chain, Middleware, SinkError, should_deliver, summary_line};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::warn;

/// SMTP notification sink. Built from the effective (global-merged) mail
/// block of a job, or from the global block for the scheduler chain.
pub struct MailSink {
    config: MailBlock,
}

impl MailSink {
    pub fn new(config: MailBlock) -> Self {
        MailSink { config }
    }

    async fn deliver(&self, exec: &Execution) -> Result<(), SinkError> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .ok_or_else(|| SinkError::Mail("smtp-host not set".to_string()))?;
        let from = parse_mailbox(self.config.email_from.as_deref(), "email-from")?;
        let to = parse_mailbox(self.config.email_to.as_deref(), "email-to")?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| SinkError::Mail(e.to_string()))?;
        if let Some(port) = self.config.smtp_port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(password)) =
            (self.config.smtp_user.clone(), self.config.smtp_password.clone())
        {
            builder = builder.credentials(Credentials::new(user, password));
        }
        let transport = builder.build();

        let subject = format!("{} [{}]", exec.job, exec.outcome.label());
        let mut body = summary_line(exec);
        if !exec.stdout.is_empty() {
            body.push_str("\n\nstdout:\n");
            body.push_str(&exec.stdout);
        }
        if !exec.stderr.is_empty() {
            body.push_str("\n\nstderr:\n");
            body.push_str(&exec.stderr);
        }

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body)
            .map_err(|e| SinkError::Mail(e.to_string()))?;
        transport
            .send(message)
            .await
            .map_err(|e| SinkError::Mail(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(value: Option<&str>, key: &str) -> Result<Mailbox, SinkError> {
    value
        .ok_or_else(|| SinkError::Mail(format!("{key} not set")))?
        .parse()
        .map_err(|e| SinkError::Mail(format!("{key}: {e}")))
}

#[async_trait]
impl Middleware for MailSink {
    fn tag(&self) -> &'static str {
        "mail"
    }

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
        chain.next(exec).await;
        if should_deliver(self.config.only_on_error, exec)
            && let Err(err) = self.deliver(exec).await
        {
            warn!(job = %exec.job, error = %err, "mail notification failed");
        }
    }
}

//! Mail delivery abstraction for email-confirm.
//!
//! The registry hands a [`TemplateContext`] to a [`Mailer`]. Implement
//! [`Mailer`] directly to render and deliver however you like, or implement
//! the lower-level [`EmailSender`] and wrap it in a [`TemplateMailer`].

use serde_json::{Map, Value};
use std::future::Future;
use thiserror::Error;

/// Variables available to confirmation email templates.
///
/// Always contains `email`, `token` and `confirmation_url`.
pub type TemplateContext = Map<String, Value>;

/// Error type for mail operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    /// The template context lacks a usable recipient.
    #[error("template context has no recipient email")]
    MissingRecipient,

    /// Failed to deliver email.
    #[error("email delivery failed: {0}")]
    DeliveryError(String),
}

/// Sends a confirmation email from a template context.
///
/// Failures are reported synchronously and propagate to the caller of
/// `send`; the registry never retries. The `()` implementation is a no-op.
pub trait Mailer: Send + Sync + Clone + 'static {
    fn send(
        &self,
        context: &TemplateContext,
    ) -> impl Future<Output = Result<(), MailError>> + Send;
}

/// No-op mailer (default).
impl Mailer for () {
    async fn send(&self, _context: &TemplateContext) -> Result<(), MailError> {
        Ok(())
    }
}

/// Trait for async email delivery.
///
/// # Example
///
/// ```rust,ignore
/// use email_confirm::{EmailSender, MailError};
///
/// #[derive(Clone)]
/// struct MyEmailService { /* ... */ }
///
/// impl EmailSender for MyEmailService {
///     async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
///         // Queue or send email
///         Ok(())
///     }
/// }
/// ```
pub trait EmailSender: Send + Sync + Clone + 'static {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), MailError>> + Send;
}

/// No-op email sender.
impl EmailSender for () {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Ok(())
    }
}

/// Renders a single-line subject and an HTML body from the context and
/// delivers them to `context["email"]` through an [`EmailSender`].
#[derive(Debug, Clone)]
pub struct TemplateMailer<E: EmailSender> {
    sender: E,
    subject: String,
}

impl<E: EmailSender> TemplateMailer<E> {
    pub fn new(sender: E) -> Self {
        Self {
            sender,
            subject: "Confirm your email address".to_string(),
        }
    }

    /// Override the subject line. Line breaks are stripped.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn subject_render(&self) -> String {
        self.subject.lines().collect()
    }

    pub fn body_render(&self, context: &TemplateContext) -> String {
        let url = context_str(context, "confirmation_url").unwrap_or_default();
        format!(
            "<p>Please confirm your email address by clicking this link:</p>\n\
             <p><a href=\"{url}\">{url}</a></p>"
        )
    }
}

impl<E: EmailSender> Mailer for TemplateMailer<E> {
    async fn send(&self, context: &TemplateContext) -> Result<(), MailError> {
        let to = context_str(context, "email").ok_or(MailError::MissingRecipient)?;
        let subject = self.subject_render();
        let body = self.body_render(context);
        self.sender.send(to, &subject, &body).await
    }
}

/// Logs every confirmation email instead of delivering it.
///
/// Useful in development, where the link can be copied from the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, context: &TemplateContext) -> Result<(), MailError> {
        let to = context_str(context, "email").ok_or(MailError::MissingRecipient)?;
        tracing::info!(
            to,
            confirmation_url = context_str(context, "confirmation_url"),
            "confirmation email"
        );
        Ok(())
    }
}

fn context_str<'a>(context: &'a TemplateContext, key: &str) -> Option<&'a str> {
    context.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSender {
        sent: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    impl EmailSender for RecordingSender {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn context() -> TemplateContext {
        let mut context = TemplateContext::new();
        context.insert("email".into(), json!("a@example.com"));
        context.insert("token".into(), json!("ABC123"));
        context.insert(
            "confirmation_url".into(),
            json!("https://example.com/key/ABC123/"),
        );
        context
    }

    #[tokio::test]
    async fn template_mailer_sends_to_context_email() {
        let sender = RecordingSender::default();
        let mailer = TemplateMailer::new(sender.clone()).with_subject("Confirm\nyour email");

        Mailer::send(&mailer, &context()).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, subject, body) = &sent[0];
        assert_eq!(to, "a@example.com");
        assert_eq!(subject, "Confirmyour email");
        assert!(body.contains("https://example.com/key/ABC123/"));
    }

    #[tokio::test]
    async fn template_mailer_requires_recipient() {
        let mailer = TemplateMailer::new(());
        let mut context = context();
        context.remove("email");

        let result = Mailer::send(&mailer, &context).await;
        assert_eq!(result, Err(MailError::MissingRecipient));
    }

    #[tokio::test]
    async fn log_mailer_accepts_context() {
        assert!(LogMailer.send(&context()).await.is_ok());
    }
}

//! Confirmation flows: create, send, expire, confirm.

use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::{
    ConfirmHooks, ConfirmOutcome, EmailConfirm,
    backend::{ConfirmBackend, ConfirmTransaction, EmailOwner, InsertError, SendBookkeeping},
    config::ConfirmConfig,
    confirmation::{DEFAULT_EMAIL_FIELD, EmailConfirmation, token_generate},
    email::email_normalize,
    error::ConfirmError,
    handlers::CONFIRM_KEY_PATH,
    mailer::{Mailer, TemplateContext},
    request::ConfirmRequest,
};

/// How many fresh tokens `create` tries before giving up on collisions.
pub const TOKEN_INSERT_ATTEMPTS: u32 = 3;

/// Build the absolute confirmation link for a token.
///
/// Returns `{site_root_url}{path_prefix}/key/{token}/`.
pub fn confirmation_link_build(config: &ConfirmConfig, token: &str) -> String {
    format!(
        "{}{}{}",
        config.site_root_url.trim().trim_end_matches('/'),
        config.path_prefix,
        CONFIRM_KEY_PATH.replace("{token}", token)
    )
}

impl<B: ConfirmBackend, H: ConfirmHooks<B>, M: Mailer> EmailConfirm<B, H, M> {
    /// Issue a confirmation for one of the owner's email fields.
    ///
    /// `email_field` defaults to `"email"`; a missing or blank `email`
    /// defaults to the owner's current value of that field. No email is sent.
    pub async fn create(
        &self,
        owner: &B::Owner,
        email_field: Option<&str>,
        email: Option<&str>,
    ) -> Result<EmailConfirmation, ConfirmError> {
        let email_field = email_field.unwrap_or(DEFAULT_EMAIL_FIELD);
        let email = match email.filter(|email| !email.trim().is_empty()) {
            Some(email) => email_normalize(email)?,
            None => email_normalize(
                &owner
                    .email_field(email_field)
                    .ok_or(ConfirmError::InvalidEmail)?,
            )?,
        };
        let owner_ref = owner.owner_ref();

        for attempt in 1..=TOKEN_INSERT_ATTEMPTS {
            let token = token_generate(self.config().token_length);
            let confirmation =
                EmailConfirmation::new(owner_ref.clone(), email_field, email.clone(), token);

            match self.backend().confirmation_insert(&confirmation).await {
                Ok(()) => {
                    tracing::info!(owner = %owner_ref, email_field, "email confirmation created");
                    return Ok(confirmation);
                }
                Err(InsertError::DuplicateOwner) => return Err(ConfirmError::UniquenessViolation),
                Err(InsertError::DuplicateToken) => {
                    tracing::warn!(attempt, "confirmation token collision, regenerating");
                }
                Err(InsertError::Backend(e)) => return Err(ConfirmError::backend(e)),
            }
        }

        Err(ConfirmError::UniquenessViolation)
    }

    /// Latest confirmation issued for an owner's field (default `"email"`).
    pub async fn confirmation_for(
        &self,
        owner: &B::Owner,
        email_field: Option<&str>,
    ) -> Result<Option<EmailConfirmation>, ConfirmError> {
        self.backend()
            .confirmation_find_for(
                &owner.owner_ref(),
                email_field.unwrap_or(DEFAULT_EMAIL_FIELD),
            )
            .await
            .map_err(ConfirmError::backend)
    }

    pub fn confirmation_url(&self, confirmation: &EmailConfirmation) -> String {
        confirmation_link_build(self.config(), &confirmation.token)
    }

    /// Variables handed to the mailer for this confirmation.
    ///
    /// Hook-supplied variables come first; `email`, `token` and
    /// `confirmation_url` overwrite them.
    pub async fn template_context(
        &self,
        confirmation: &EmailConfirmation,
    ) -> Result<TemplateContext, ConfirmError> {
        let owner = self
            .backend()
            .owner_get(&confirmation.owner)
            .await
            .map_err(ConfirmError::backend)?;

        let mut context = owner
            .as_ref()
            .and_then(|owner| self.hooks().template_context(owner))
            .unwrap_or_default();

        context.insert("email".into(), Value::from(confirmation.email.clone()));
        context.insert("token".into(), Value::from(confirmation.token.clone()));
        context.insert(
            "confirmation_url".into(),
            Value::from(self.confirmation_url(confirmation)),
        );

        Ok(context)
    }

    /// Send (or resend) the confirmation email with the configured mailer.
    pub async fn send(&self, confirmation: &mut EmailConfirmation) -> Result<(), ConfirmError> {
        self.send_with(confirmation, self.mailer()).await
    }

    /// Send (or resend) the confirmation email with an explicit mailer.
    ///
    /// Mailer errors propagate and leave the bookkeeping untouched. If the
    /// mail went out but persisting the bookkeeping fails, the stored send
    /// count stays one behind; this is not compensated.
    pub async fn send_with<Other: Mailer>(
        &self,
        confirmation: &mut EmailConfirmation,
        mailer: &Other,
    ) -> Result<(), ConfirmError> {
        let context = self.template_context(confirmation).await?;

        mailer.send(&context).await?;

        let mut sent = confirmation.clone();
        sent.sent_record(Utc::now());

        self.backend()
            .confirmation_send_update(
                sent.id,
                SendBookkeeping {
                    sent_at: sent.sent_at,
                    resent_at_latest: sent.resent_at_latest,
                    send_count: sent.send_count,
                },
            )
            .await
            .map_err(ConfirmError::backend)?;

        tracing::info!(
            owner = %sent.owner,
            send_count = sent.send_count,
            "confirmation email sent"
        );
        *confirmation = sent;
        Ok(())
    }

    /// Whether the confirmation window has closed. Unsent records are expired.
    pub fn is_expired(&self, confirmation: &EmailConfirmation) -> bool {
        confirmation.is_expired_at(self.config().confirm_expire, Utc::now())
    }

    /// Confirm the address and apply it to the owner.
    ///
    /// Confirming an already confirmed record is a no-op. Expired records and
    /// records whose owner was deleted fail with [`ConfirmError::Expired`]
    /// and are left unchanged.
    pub async fn confirm(
        &self,
        confirmation: &mut EmailConfirmation,
        request: &ConfirmRequest,
    ) -> Result<ConfirmOutcome, ConfirmError> {
        if confirmation.is_confirmed() {
            tracing::debug!(owner = %confirmation.owner, "confirmation already confirmed");
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }

        let now = Utc::now();
        if confirmation.is_expired_at(self.config().confirm_expire, now) {
            tracing::warn!(owner = %confirmation.owner, "confirmation expired");
            return Err(ConfirmError::Expired);
        }

        let owner = self
            .backend()
            .owner_get(&confirmation.owner)
            .await
            .map_err(ConfirmError::backend)?
            .ok_or_else(|| {
                tracing::warn!(owner = %confirmation.owner, "confirmation owner no longer exists");
                ConfirmError::Expired
            })?;

        let mut confirmed = confirmation.clone();
        confirmed.confirmed_at = Some(now);

        let mut tx = self
            .backend()
            .transaction_begin()
            .await
            .map_err(ConfirmError::backend)?;

        let applied = match tx.confirmed_at_mark(confirmed.id, now).await {
            Ok(true) => {
                self.hooks()
                    .on_confirmed(&mut tx, &owner, &confirmed, request)
                    .await
                    .map(Some)
            }
            Ok(false) => Ok(None),
            Err(e) => Err(ConfirmError::backend(e)),
        };

        match applied {
            Ok(Some(outcome)) => {
                tx.commit().await.map_err(ConfirmError::backend)?;
                tracing::info!(owner = %confirmed.owner, "email confirmed");
                *confirmation = confirmed;
                Ok(outcome)
            }
            Ok(None) => {
                // Lost the race to a concurrent confirm.
                tx.rollback().await.map_err(ConfirmError::backend)?;
                if let Some(stored) = self
                    .backend()
                    .confirmation_find_by_token(&confirmation.token)
                    .await
                    .map_err(ConfirmError::backend)?
                {
                    *confirmation = stored;
                }
                Ok(ConfirmOutcome::AlreadyConfirmed)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "confirm rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Resolve a token and confirm it. Unknown tokens fail with [`ConfirmError::NotFound`].
    pub async fn confirm_token(
        &self,
        token: &str,
        request: &ConfirmRequest,
    ) -> Result<(EmailConfirmation, ConfirmOutcome), ConfirmError> {
        let mut confirmation = self
            .backend()
            .confirmation_find_by_token(token)
            .await
            .map_err(ConfirmError::backend)?
            .ok_or(ConfirmError::NotFound)?;

        let outcome = self.confirm(&mut confirmation, request).await?;
        Ok((confirmation, outcome))
    }

    /// Owner-specific response after a confirmation link was followed.
    ///
    /// `None` means the caller should render its default response.
    pub async fn view(
        &self,
        confirmation: &EmailConfirmation,
        request: &ConfirmRequest,
    ) -> Result<Option<Response>, ConfirmError> {
        let owner = self
            .backend()
            .owner_get(&confirmation.owner)
            .await
            .map_err(ConfirmError::backend)?;

        Ok(owner.and_then(|owner| self.hooks().response_view(&owner, confirmation, request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryOwner, MemoryTransaction};
    use crate::{MailError, OwnerRef, email_field_apply};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Redirect};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> ConfirmConfig {
        ConfirmConfig {
            site_root_url: "https://example.com/".to_string(),
            ..Default::default()
        }
    }

    async fn setup() -> (EmailConfirm<MemoryBackend>, MemoryOwner) {
        let backend = MemoryBackend::new();
        let owner = MemoryOwner::new(OwnerRef::new("user", 1)).with_field("email", "old@example.com");
        backend.owner_insert(owner.clone()).await;
        let confirm = EmailConfirm::new(config(), backend).expect("valid config");
        (confirm, owner)
    }

    #[derive(Clone)]
    struct FailingMailer;

    impl Mailer for FailingMailer {
        async fn send(&self, _context: &TemplateContext) -> Result<(), MailError> {
            Err(MailError::DeliveryError("connection refused".into()))
        }
    }

    #[derive(Clone)]
    struct ProfileHooks;

    impl ConfirmHooks<MemoryBackend> for ProfileHooks {
        fn template_context(&self, owner: &MemoryOwner) -> Option<TemplateContext> {
            let mut context = TemplateContext::new();
            context.insert("name".into(), json!(owner.field("name")));
            context.insert("token".into(), json!("spoofed"));
            Some(context)
        }

        async fn on_confirmed(
            &self,
            tx: &mut MemoryTransaction,
            _owner: &MemoryOwner,
            confirmation: &EmailConfirmation,
            _request: &ConfirmRequest,
        ) -> Result<ConfirmOutcome, ConfirmError> {
            email_field_apply(tx, confirmation).await?;
            tx.owner_email_set(&confirmation.owner, "email_verified", "yes")
                .await
                .map_err(ConfirmError::backend)?;
            Ok(ConfirmOutcome::Response(
                (StatusCode::ACCEPTED, "welcome").into_response(),
            ))
        }

        fn response_view(
            &self,
            _owner: &MemoryOwner,
            _confirmation: &EmailConfirmation,
            _request: &ConfirmRequest,
        ) -> Option<Response> {
            Some(Redirect::to("/welcome").into_response())
        }
    }

    #[derive(Clone)]
    struct RejectingHooks;

    impl ConfirmHooks<MemoryBackend> for RejectingHooks {
        async fn on_confirmed(
            &self,
            tx: &mut MemoryTransaction,
            _owner: &MemoryOwner,
            confirmation: &EmailConfirmation,
            _request: &ConfirmRequest,
        ) -> Result<ConfirmOutcome, ConfirmError> {
            email_field_apply(tx, confirmation).await?;
            Err(ConfirmError::Internal("profile locked".into()))
        }
    }

    #[test]
    fn link_joins_site_root_prefix_and_token() {
        let mut cfg = config();
        assert_eq!(
            confirmation_link_build(&cfg, "ABC123"),
            "https://example.com/key/ABC123/"
        );

        cfg.path_prefix = "/email".to_string();
        assert_eq!(
            confirmation_link_build(&cfg, "ABC123"),
            "https://example.com/email/key/ABC123/"
        );
    }

    #[tokio::test]
    async fn create_defaults_to_owner_email_field() {
        let (confirm, owner) = setup().await;

        let confirmation = confirm.create(&owner, None, None).await.unwrap();

        assert_eq!(confirmation.email_field, "email");
        assert_eq!(confirmation.email, "old@example.com");
        assert_eq!(confirmation.token.len(), 16);
    }

    #[tokio::test]
    async fn create_with_blank_email_falls_back_to_owner_field() {
        for blank in ["", "   "] {
            let (confirm, owner) = setup().await;
            let confirmation = confirm.create(&owner, None, Some(blank)).await.unwrap();
            assert_eq!(confirmation.email, "old@example.com");
        }
    }

    #[tokio::test]
    async fn create_without_any_email_is_rejected() {
        let (confirm, owner) = setup().await;

        let result = confirm.create(&owner, Some("backup_email"), None).await;
        assert!(matches!(result, Err(ConfirmError::InvalidEmail)));

        let result = confirm.create(&owner, Some("backup_email"), Some("")).await;
        assert!(matches!(result, Err(ConfirmError::InvalidEmail)));
    }

    #[tokio::test]
    async fn create_respects_configured_token_length() {
        let backend = MemoryBackend::new();
        let owner = MemoryOwner::new(OwnerRef::new("user", 7));
        backend.owner_insert(owner.clone()).await;
        let confirm = EmailConfirm::new(
            ConfirmConfig {
                token_length: 32,
                ..config()
            },
            backend,
        )
        .unwrap();

        let confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();

        assert_eq!(confirmation.token.len(), 32);
    }

    #[tokio::test]
    async fn confirmation_for_returns_latest_for_field() {
        let (confirm, owner) = setup().await;
        confirm
            .create(&owner, None, Some("first@example.com"))
            .await
            .unwrap();
        let second = confirm
            .create(&owner, None, Some("second@example.com"))
            .await
            .unwrap();

        let found = confirm.confirmation_for(&owner, None).await.unwrap();

        assert_eq!(found.map(|c| c.id), Some(second.id));
        assert!(
            confirm
                .confirmation_for(&owner, Some("backup_email"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn mail_failure_propagates_without_bookkeeping() {
        let (confirm, owner) = setup().await;
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();

        let result = confirm.send_with(&mut confirmation, &FailingMailer).await;

        assert!(matches!(result, Err(ConfirmError::Mail(_))));
        assert_eq!(confirmation.send_count, 0);
        let stored = confirm
            .backend()
            .confirmation_find_by_token(&confirmation.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.send_count, 0);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn is_expired_treats_unsent_as_expired() {
        let (confirm, owner) = setup().await;
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();
        assert!(confirm.is_expired(&confirmation));

        confirm.send(&mut confirmation).await.unwrap();
        assert!(!confirm.is_expired(&confirmation));
    }

    #[tokio::test]
    async fn confirm_unsent_record_fails_expired() {
        let (confirm, owner) = setup().await;
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();

        let result = confirm
            .confirm(&mut confirmation, &ConfirmRequest::default())
            .await;

        assert!(matches!(result, Err(ConfirmError::Expired)));
        assert!(confirmation.confirmed_at.is_none());
    }

    #[tokio::test]
    async fn hook_context_cannot_override_core_keys() {
        let (confirm, _) = setup().await;
        let confirm = confirm.with_hooks(ProfileHooks);
        let owner = MemoryOwner::new(OwnerRef::new("profile", 2)).with_field("name", "Ada");
        confirm.backend().owner_insert(owner.clone()).await;
        let confirmation = confirm
            .create(&owner, None, Some("ada@example.com"))
            .await
            .unwrap();

        let context = confirm.template_context(&confirmation).await.unwrap();

        assert_eq!(context["name"], json!("Ada"));
        assert_eq!(context["token"], json!(confirmation.token));
        assert_eq!(context["email"], json!("ada@example.com"));
        assert_eq!(
            context["confirmation_url"],
            json!(format!("https://example.com/key/{}/", confirmation.token))
        );
    }

    #[tokio::test]
    async fn custom_confirm_hook_replaces_default_and_commits() {
        let (confirm, owner) = setup().await;
        let confirm = confirm.with_hooks(ProfileHooks);
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();
        confirm.send(&mut confirmation).await.unwrap();

        let outcome = confirm
            .confirm(&mut confirmation, &ConfirmRequest::default())
            .await
            .unwrap();

        match outcome {
            ConfirmOutcome::Response(response) => {
                assert_eq!(response.status(), StatusCode::ACCEPTED)
            }
            other => panic!("expected hook response, got {other:?}"),
        }
        let stored = confirm
            .backend()
            .owner_get(&owner.owner_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.field("email"), Some("new@example.com"));
        assert_eq!(stored.field("email_verified"), Some("yes"));

        let view = confirm
            .view(&confirmation, &ConfirmRequest::default())
            .await
            .unwrap()
            .expect("hook view");
        assert_eq!(view.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn failing_hook_rolls_back_record_and_owner() {
        let (confirm, owner) = setup().await;
        let confirm = confirm.with_hooks(RejectingHooks);
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();
        confirm.send(&mut confirmation).await.unwrap();

        let result = confirm
            .confirm(&mut confirmation, &ConfirmRequest::default())
            .await;

        assert!(matches!(result, Err(ConfirmError::Internal(_))));
        assert!(confirmation.confirmed_at.is_none());
        let stored = confirm
            .backend()
            .confirmation_find_by_token(&confirmation.token)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.confirmed_at.is_none());
        let stored_owner = confirm
            .backend()
            .owner_get(&owner.owner_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored_owner.field("email"), Some("old@example.com"));
    }

    #[tokio::test]
    async fn view_without_hook_is_none() {
        let (confirm, owner) = setup().await;
        let confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();

        let view = confirm
            .view(&confirmation, &ConfirmRequest::default())
            .await
            .unwrap();

        assert!(view.is_none());
    }

    #[tokio::test]
    async fn concurrent_confirms_mutate_owner_once() {
        let (confirm, owner) = setup().await;
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();
        confirm.send(&mut confirmation).await.unwrap();
        let writes_before = confirm.backend().owner_writes().await;

        let mut first = confirmation.clone();
        let mut second = confirmation.clone();
        let request = ConfirmRequest::default();
        let (a, b) = tokio::join!(
            confirm.confirm(&mut first, &request),
            confirm.confirm(&mut second, &request)
        );

        let fresh = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|outcome| outcome.is_fresh())
            .count();
        assert_eq!(fresh, 1);
        assert_eq!(confirm.backend().owner_writes().await, writes_before + 1);
        assert!(first.confirmed_at.is_some());
        assert_eq!(first.confirmed_at, second.confirmed_at);
    }

    #[tokio::test]
    async fn expiry_window_comes_from_config() {
        let (confirm, owner) = setup().await;
        let mut confirmation = confirm
            .create(&owner, None, Some("new@example.com"))
            .await
            .unwrap();
        confirm.send(&mut confirmation).await.unwrap();

        let sent_at = confirmation.sent_at.unwrap();
        let window = Duration::from_secs(86_400);
        assert!(!confirmation.is_expired_at(window, sent_at + chrono::Duration::seconds(86_399)));
        assert!(confirmation.is_expired_at(window, sent_at + chrono::Duration::seconds(86_400)));
    }
}

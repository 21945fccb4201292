//! # email-confirm
//!
//! Single-use, time-limited email address confirmation for Axum.
//!
//! ## Features
//!
//! - **Any owner**: confirm an email field on users, profiles, or anything
//!   addressable by a type tag and id
//! - **Random tokens** of uppercase letters and digits, unique per record
//! - **Resend bookkeeping**: first send, latest resend and a send counter
//! - **Atomic confirm**: the record and the owner are updated in one transaction,
//!   and concurrent confirms of the same token mutate the owner once
//! - **Extensible backend trait** for any database
//! - **Hooks** to add template variables, replace the owner update, or render
//!   a custom response
//!
//! ## Quick Start
//!
//! First, implement the [`ConfirmBackend`] trait for your database:
//!
//! ```rust,ignore
//! use email_confirm::{ConfirmBackend, EmailOwner};
//!
//! #[derive(Clone)]
//! struct MyBackend { /* your db pool */ }
//!
//! impl ConfirmBackend for MyBackend {
//!     type Owner = MyUser;
//!     type Transaction = MyTransaction;
//!     type Error = MyError;
//!
//!     // ... implement methods
//! }
//! ```
//!
//! Then create an `EmailConfirm` instance, issue confirmations and add routes:
//!
//! ```rust,ignore
//! use email_confirm::{ConfirmConfig, EmailConfirm, TemplateMailer};
//!
//! let confirm = EmailConfirm::new(ConfirmConfig::from_env()?, backend)?
//!     .with_mailer(TemplateMailer::new(my_smtp_sender));
//!
//! let mut confirmation = confirm.create(&user, None, None).await?;
//! confirm.send(&mut confirmation).await?;
//!
//! let app = axum::Router::new().merge(confirm.routes::<()>());
//! ```
//!
//! ## Endpoints
//!
//! - `GET {path_prefix}/key/{token}/` - Confirm the address behind a token
//!
//! ## Hooks
//!
//! ```rust,ignore
//! use email_confirm::{ConfirmBackend, ConfirmHooks, TemplateContext};
//! use serde_json::json;
//!
//! #[derive(Clone)]
//! struct MyHooks;
//!
//! impl ConfirmHooks<MyBackend> for MyHooks {
//!     fn template_context(&self, user: &MyUser) -> Option<TemplateContext> {
//!         let mut context = TemplateContext::new();
//!         context.insert("name".into(), json!(user.name));
//!         Some(context)
//!     }
//! }
//!
//! let confirm = EmailConfirm::new(config, backend)?.with_hooks(MyHooks);
//! ```

mod backend;
mod config;
mod confirmation;
mod email;
mod error;
pub mod handlers;
mod mailer;
pub mod memory;
pub mod openapi;
mod registry;
mod request;
pub mod testing;

use axum::Router;
use axum::response::Response;
use std::future::Future;
use std::sync::Arc;

pub use backend::{
    ConfirmBackend, ConfirmTransaction, EmailOwner, InsertError, OwnerRef, SendBookkeeping,
};
pub use config::{
    CONFIRM_EXPIRE_MAX, ConfirmConfig, ConfirmConfigError, TOKEN_LENGTH_MAX, TOKEN_LENGTH_MIN,
};
pub use confirmation::{
    ConfirmationState, DEFAULT_EMAIL_FIELD, EmailConfirmation, TOKEN_ALPHABET, token_generate,
};
pub use email::email_normalize;
pub use error::{ConfirmError, ConfirmErrorResponse};
pub use mailer::{EmailSender, LogMailer, MailError, Mailer, TemplateContext, TemplateMailer};
pub use registry::{TOKEN_INSERT_ATTEMPTS, confirmation_link_build};
pub use request::ConfirmRequest;

/// Result of a successful confirm call.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// The record was confirmed before this call; nothing changed.
    AlreadyConfirmed,
    /// This call confirmed the record and applied it to the owner.
    Confirmed,
    /// This call confirmed the record and a hook supplied the response.
    Response(Response),
}

impl ConfirmOutcome {
    /// Whether this call performed the confirmation.
    pub fn is_fresh(&self) -> bool {
        !matches!(self, Self::AlreadyConfirmed)
    }
}

/// Write the confirmed email into the owner's field.
///
/// This is what [`ConfirmHooks::on_confirmed`] does unless overridden.
/// Custom hooks may call it to keep the default write alongside their own.
pub async fn email_field_apply<T: ConfirmTransaction>(
    tx: &mut T,
    confirmation: &EmailConfirmation,
) -> Result<ConfirmOutcome, ConfirmError> {
    tx.owner_email_set(
        &confirmation.owner,
        &confirmation.email_field,
        &confirmation.email,
    )
    .await
    .map_err(ConfirmError::backend)?;
    Ok(ConfirmOutcome::Confirmed)
}

/// Per-owner customisation of the confirmation flow.
///
/// Every method has a default, so implement only what you need. Owners of
/// different types arrive through the same hooks; match on
/// [`EmailOwner::owner_ref`] to tell them apart.
pub trait ConfirmHooks<B: ConfirmBackend>: Send + Sync + Clone + 'static {
    /// Extra template variables for the confirmation email.
    ///
    /// `email`, `token` and `confirmation_url` always override keys returned here.
    fn template_context(&self, _owner: &B::Owner) -> Option<TemplateContext> {
        None
    }

    /// Apply a confirmation to its owner.
    ///
    /// Runs inside the confirm transaction, after `confirmed_at` was marked.
    /// Any error rolls both writes back. Do not call back into the backend
    /// outside `tx` from here.
    fn on_confirmed(
        &self,
        tx: &mut B::Transaction,
        _owner: &B::Owner,
        confirmation: &EmailConfirmation,
        _request: &ConfirmRequest,
    ) -> impl Future<Output = Result<ConfirmOutcome, ConfirmError>> + Send {
        email_field_apply(tx, confirmation)
    }

    /// Custom HTTP response after a confirmation link was followed.
    ///
    /// `None` renders the default response.
    fn response_view(
        &self,
        _owner: &B::Owner,
        _confirmation: &EmailConfirmation,
        _request: &ConfirmRequest,
    ) -> Option<Response> {
        None
    }
}

impl<B: ConfirmBackend> ConfirmHooks<B> for () {}

/// Email confirmation registry. Cheap to clone.
///
/// # Type Parameters
///
/// - `B`: The backend implementing [`ConfirmBackend`]
/// - `H`: Optional hooks implementing [`ConfirmHooks`] (defaults to `()`)
/// - `M`: The mailer implementing [`Mailer`] (defaults to the no-op `()`)
#[derive(Clone)]
pub struct EmailConfirm<B: ConfirmBackend, H: ConfirmHooks<B> = (), M: Mailer = ()> {
    config: Arc<ConfirmConfig>,
    backend: B,
    hooks: H,
    mailer: M,
}

impl<B: ConfirmBackend> EmailConfirm<B, (), ()> {
    /// Create a registry with no-op hooks and mailer.
    pub fn new(config: ConfirmConfig, backend: B) -> Result<Self, ConfirmConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            backend,
            hooks: (),
            mailer: (),
        })
    }
}

impl<B: ConfirmBackend, H: ConfirmHooks<B>, M: Mailer> EmailConfirm<B, H, M> {
    /// Attach custom hooks.
    pub fn with_hooks<NewH: ConfirmHooks<B>>(self, hooks: NewH) -> EmailConfirm<B, NewH, M> {
        EmailConfirm {
            config: self.config,
            backend: self.backend,
            hooks,
            mailer: self.mailer,
        }
    }

    /// Attach the mailer used by [`EmailConfirm::send`].
    pub fn with_mailer<NewM: Mailer>(self, mailer: NewM) -> EmailConfirm<B, H, NewM> {
        EmailConfirm {
            config: self.config,
            backend: self.backend,
            hooks: self.hooks,
            mailer,
        }
    }

    /// Returns a router with the confirmation endpoint.
    ///
    /// Endpoints:
    /// - `GET {path_prefix}/key/{token}/`
    pub fn routes<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        handlers::confirm_routes::<B, H, M>(&self.config.path_prefix).with_state(self.clone())
    }

    pub fn config(&self) -> &ConfirmConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }
}

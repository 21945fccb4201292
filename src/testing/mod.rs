//! Test suite for verifying email-confirm integration.
//!
//! This module provides a reusable test suite that users can invoke to verify
//! their [`ConfirmBackend`] implementations honour the confirmation lifecycle.
//!
//! # Usage
//!
//! Implement the [`TestContext`] trait for your test infrastructure, then use
//! the [`Suite`] to run all tests:
//!
//! ```ignore
//! use email_confirm::testing::{CaptureMailer, Suite, TestContext};
//!
//! struct MyContext { /* your registry and db handle */ }
//!
//! impl TestContext for MyContext {
//!     type Backend = MyBackend;
//!
//!     async fn spawn() -> Self {
//!         // Build a fresh store and registry
//!     }
//!     // ... other required methods
//! }
//!
//! #[tokio::test]
//! async fn run_confirm_suite() {
//!     Suite::<MyContext>::test_all().await;
//! }
//! ```
//!
//! [`ConfirmBackend`]: crate::ConfirmBackend

pub mod confirm;
pub mod create;
pub mod send;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::{
    ConfirmBackend, EmailConfirm, EmailConfirmation, EmailOwner, MailError, Mailer, OwnerRef,
    TemplateContext,
};

/// Mailer that records every template context instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct CaptureMailer {
    sent: Arc<Mutex<Vec<TemplateContext>>>,
    failing: Arc<AtomicBool>,
}

impl CaptureMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contexts captured so far, oldest first.
    pub fn sent(&self) -> Vec<TemplateContext> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Token from the most recent captured context.
    pub fn last_token(&self) -> Option<String> {
        self.sent()
            .last()
            .and_then(|context| context.get("token"))
            .and_then(|token| token.as_str())
            .map(str::to_owned)
    }

    /// Make subsequent sends fail with a delivery error.
    pub fn fail_set(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Mailer for CaptureMailer {
    async fn send(&self, context: &TemplateContext) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::DeliveryError(
                "capture mailer set to fail".to_string(),
            ));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context.clone());
        Ok(())
    }
}

/// Context trait that test implementations must provide.
///
/// This abstracts away the concrete store, allowing the test suite to run
/// against any backend that implements [`ConfirmBackend`].
pub trait TestContext: Sized + Send + Sync {
    /// The backend under test.
    type Backend: ConfirmBackend;

    /// Build a fresh store and registry.
    fn spawn() -> impl Future<Output = Self> + Send;

    /// The registry under test, wired to a [`CaptureMailer`].
    fn confirm(&self) -> &EmailConfirm<Self::Backend, (), CaptureMailer>;

    /// Persist a new owner whose `email` field holds `email`.
    fn owner_create(
        &self,
        email: &str,
    ) -> impl Future<Output = <Self::Backend as ConfirmBackend>::Owner> + Send;

    /// Hard-delete an owner (for testing the deleted-owner path).
    fn owner_delete(&self, owner: &OwnerRef) -> impl Future<Output = ()> + Send;

    /// Move a stored confirmation's `sent_at` into the past (for testing expiry).
    fn confirmation_backdate(&self, token: &str, by: Duration)
    -> impl Future<Output = ()> + Send;
}

/// Read a stored confirmation by token (for test assertions).
pub async fn confirmation_stored<C: TestContext>(ctx: &C, token: &str) -> EmailConfirmation {
    ctx.confirm()
        .backend()
        .confirmation_find_by_token(token)
        .await
        .expect("db query")
        .expect("confirmation exists")
}

/// Read an owner's stored `email` field (for test assertions).
pub async fn owner_email_stored<C: TestContext>(ctx: &C, owner: &OwnerRef) -> Option<String> {
    ctx.confirm()
        .backend()
        .owner_get(owner)
        .await
        .expect("db query")
        .expect("owner exists")
        .email_field("email")
}

/// Test suite for email-confirm.
///
/// Run all tests with `Suite::<YourContext>::test_all()`.
pub struct Suite<C: TestContext> {
    _marker: std::marker::PhantomData<C>,
}

impl<C: TestContext> Suite<C> {
    /// Run all confirmation tests.
    pub async fn test_all() {
        // Create tests
        create::create_persists_unsent_confirmation::<C>().await;
        create::create_rejects_duplicate_owner_field_email::<C>().await;
        create::create_reads_email_from_owner::<C>().await;

        // Send tests
        send::send_stamps_first_send::<C>().await;
        send::resend_stamps_latest_resend_only::<C>().await;
        send::send_context_links_to_token::<C>().await;
        send::send_mail_failure_leaves_bookkeeping::<C>().await;

        // Confirm tests
        confirm::confirm_applies_email_to_owner::<C>().await;
        confirm::confirm_twice_is_noop::<C>().await;
        confirm::confirm_expired_leaves_record_unchanged::<C>().await;
        confirm::confirm_unsent_is_expired::<C>().await;
        confirm::confirm_deleted_owner_is_expired::<C>().await;
        confirm::confirm_concurrent_mutates_owner_once::<C>().await;
        confirm::confirm_unknown_token_is_not_found::<C>().await;
    }
}

/// Generates individual test functions for the confirmation suite.
///
/// This macro creates a `#[tokio::test]` function for each test case in the suite,
/// ensuring they run individually and report separate results.
///
/// # Example
///
/// ```rust,ignore
/// email_confirm::test_suite!(MyContext);
/// ```
#[macro_export]
macro_rules! test_suite {
    ($context:ty) => {
        #[tokio::test]
        async fn create_persists_unsent_confirmation() {
            $crate::testing::create::create_persists_unsent_confirmation::<$context>().await;
        }

        #[tokio::test]
        async fn create_rejects_duplicate_owner_field_email() {
            $crate::testing::create::create_rejects_duplicate_owner_field_email::<$context>().await;
        }

        #[tokio::test]
        async fn create_reads_email_from_owner() {
            $crate::testing::create::create_reads_email_from_owner::<$context>().await;
        }

        #[tokio::test]
        async fn send_stamps_first_send() {
            $crate::testing::send::send_stamps_first_send::<$context>().await;
        }

        #[tokio::test]
        async fn resend_stamps_latest_resend_only() {
            $crate::testing::send::resend_stamps_latest_resend_only::<$context>().await;
        }

        #[tokio::test]
        async fn send_context_links_to_token() {
            $crate::testing::send::send_context_links_to_token::<$context>().await;
        }

        #[tokio::test]
        async fn send_mail_failure_leaves_bookkeeping() {
            $crate::testing::send::send_mail_failure_leaves_bookkeeping::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_applies_email_to_owner() {
            $crate::testing::confirm::confirm_applies_email_to_owner::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_twice_is_noop() {
            $crate::testing::confirm::confirm_twice_is_noop::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_expired_leaves_record_unchanged() {
            $crate::testing::confirm::confirm_expired_leaves_record_unchanged::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_unsent_is_expired() {
            $crate::testing::confirm::confirm_unsent_is_expired::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_deleted_owner_is_expired() {
            $crate::testing::confirm::confirm_deleted_owner_is_expired::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_concurrent_mutates_owner_once() {
            $crate::testing::confirm::confirm_concurrent_mutates_owner_once::<$context>().await;
        }

        #[tokio::test]
        async fn confirm_unknown_token_is_not_found() {
            $crate::testing::confirm::confirm_unknown_token_is_not_found::<$context>().await;
        }
    };
}

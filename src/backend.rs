//! Backend trait abstraction for storage-agnostic email confirmation.
//!
//! This module defines the traits that let `email-confirm` work with any
//! database: the owning records whose email field gets confirmed, the store
//! that holds confirmation records, and the transaction used by the confirm
//! step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

use crate::confirmation::EmailConfirmation;

/// Polymorphic reference to an owning record (type tag + numeric id).
///
/// This is a weak reference: the owner may have been deleted since the
/// confirmation was created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Owner type tag, e.g. `"user"` or `"profile"`.
    pub owner_type: String,
    /// Owner id within its type.
    pub owner_id: i64,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: i64) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}

/// Minimal owner interface required by email-confirm.
///
/// # Example
///
/// ```rust,ignore
/// use email_confirm::{EmailOwner, OwnerRef};
///
/// #[derive(Clone)]
/// struct Profile {
///     id: i64,
///     email: String,
///     backup_email: Option<String>,
/// }
///
/// impl EmailOwner for Profile {
///     fn owner_ref(&self) -> OwnerRef { OwnerRef::new("profile", self.id) }
///
///     fn email_field(&self, field_name: &str) -> Option<String> {
///         match field_name {
///             "email" => Some(self.email.clone()),
///             "backup_email" => self.backup_email.clone(),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait EmailOwner: Send + Sync + Clone {
    /// Returns the polymorphic reference identifying this owner.
    fn owner_ref(&self) -> OwnerRef;

    /// Reads the current value of an email field, if the field exists and is set.
    fn email_field(&self, field_name: &str) -> Option<String>;
}

/// Bookkeeping fields written after a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendBookkeeping {
    pub sent_at: Option<DateTime<Utc>>,
    pub resent_at_latest: Option<DateTime<Utc>>,
    pub send_count: u32,
}

/// Failure modes of [`ConfirmBackend::confirmation_insert`].
#[derive(Debug, Error)]
pub enum InsertError<E> {
    /// A record already exists for the same owner, field and email.
    #[error("confirmation already exists for this owner, field and email")]
    DuplicateOwner,

    /// The generated token is already taken by another record.
    #[error("confirmation token already in use")]
    DuplicateToken,

    #[error(transparent)]
    Backend(E),
}

/// Backend storage trait for confirmation records.
///
/// All single-row operations may run outside a transaction. The confirm
/// step goes through [`ConfirmBackend::transaction_begin`].
pub trait ConfirmBackend: Clone + Send + Sync + 'static {
    /// The owning record type returned by owner lookups.
    type Owner: EmailOwner;

    /// Transaction handle used by the confirm step.
    type Transaction: ConfirmTransaction<Error = Self::Error>;

    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolve an owner reference.
    ///
    /// Returns `None` if the owner was deleted.
    fn owner_get(
        &self,
        owner: &OwnerRef,
    ) -> impl Future<Output = Result<Option<Self::Owner>, Self::Error>> + Send;

    /// Insert a new confirmation record.
    ///
    /// Must enforce uniqueness of `(owner, email_field, email)` and of `token`
    /// atomically, reporting which constraint was violated.
    fn confirmation_insert(
        &self,
        confirmation: &EmailConfirmation,
    ) -> impl Future<Output = Result<(), InsertError<Self::Error>>> + Send;

    /// Find a confirmation by its token.
    fn confirmation_find_by_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<EmailConfirmation>, Self::Error>> + Send;

    /// Find the most recently created confirmation for an owner and field.
    fn confirmation_find_for(
        &self,
        owner: &OwnerRef,
        email_field: &str,
    ) -> impl Future<Output = Result<Option<EmailConfirmation>, Self::Error>> + Send;

    /// Persist send bookkeeping. Only these three columns may be written.
    fn confirmation_send_update(
        &self,
        id: Uuid,
        bookkeeping: SendBookkeeping,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Begin a transaction for the confirm step.
    fn transaction_begin(
        &self,
    ) -> impl Future<Output = Result<Self::Transaction, Self::Error>> + Send;
}

/// Transaction scope for the confirm step.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must
/// discard its writes.
pub trait ConfirmTransaction: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Set `confirmed_at` if it is still unset.
    ///
    /// Returns `false` when the record was already confirmed, which happens
    /// when a concurrent confirm committed first.
    fn confirmed_at_mark(
        &mut self,
        id: Uuid,
        confirmed_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Write `email` into the owner's `email_field`, touching no other field.
    fn owner_email_set(
        &mut self,
        owner: &OwnerRef,
        email_field: &str,
        email: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

//! In-memory [`ConfirmBackend`] for tests, demos and single-process setups.
//!
//! Owners live next to the confirmation records. Deleting an owner is a
//! hard delete, so confirmations pointing at it resolve to `None` and fail
//! as expired. Transactions hold the store mutex from begin to
//! commit/rollback, which serializes concurrent confirms.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::backend::{
    ConfirmBackend, ConfirmTransaction, EmailOwner, InsertError, OwnerRef, SendBookkeeping,
};
use crate::confirmation::EmailConfirmation;

/// An owner stored as a bag of named string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOwner {
    owner: OwnerRef,
    fields: HashMap<String, String>,
}

impl MemoryOwner {
    pub fn new(owner: OwnerRef) -> Self {
        Self {
            owner,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl EmailOwner for MemoryOwner {
    fn owner_ref(&self) -> OwnerRef {
        self.owner.clone()
    }

    fn email_field(&self, field_name: &str) -> Option<String> {
        self.field(field_name).map(str::to_owned)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("confirmation {0} not found")]
    ConfirmationMissing(Uuid),

    #[error("owner {0} not found")]
    OwnerMissing(OwnerRef),
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    owners: HashMap<OwnerRef, MemoryOwner>,
    confirmations: HashMap<Uuid, EmailConfirmation>,
    owner_writes: u64,
}

impl MemoryState {
    fn confirmation_mut(&mut self, id: Uuid) -> Result<&mut EmailConfirmation, MemoryError> {
        self.confirmations
            .get_mut(&id)
            .ok_or(MemoryError::ConfirmationMissing(id))
    }
}

/// In-memory store backed by an `Arc<Mutex<..>>`. Cheap to clone; clones
/// share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an owner.
    pub async fn owner_insert(&self, owner: MemoryOwner) {
        let mut state = self.state.lock().await;
        state.owners.insert(owner.owner_ref(), owner);
    }

    /// Hard-delete an owner. Its confirmations stay behind.
    pub async fn owner_remove(&self, owner: &OwnerRef) -> Option<MemoryOwner> {
        self.state.lock().await.owners.remove(owner)
    }

    /// Number of owner field writes committed so far.
    pub async fn owner_writes(&self) -> u64 {
        self.state.lock().await.owner_writes
    }

    /// Edit a stored confirmation in place, e.g. to backdate `sent_at`.
    ///
    /// Returns `false` if no confirmation has this token.
    pub async fn confirmation_update_with<F>(&self, token: &str, update: F) -> bool
    where
        F: FnOnce(&mut EmailConfirmation),
    {
        let mut state = self.state.lock().await;
        match state
            .confirmations
            .values_mut()
            .find(|confirmation| confirmation.token == token)
        {
            Some(confirmation) => {
                update(confirmation);
                true
            }
            None => false,
        }
    }
}

impl ConfirmBackend for MemoryBackend {
    type Owner = MemoryOwner;
    type Transaction = MemoryTransaction;
    type Error = MemoryError;

    async fn owner_get(&self, owner: &OwnerRef) -> Result<Option<MemoryOwner>, MemoryError> {
        Ok(self.state.lock().await.owners.get(owner).cloned())
    }

    async fn confirmation_insert(
        &self,
        confirmation: &EmailConfirmation,
    ) -> Result<(), InsertError<MemoryError>> {
        let mut state = self.state.lock().await;

        if state.confirmations.values().any(|existing| {
            existing.owner == confirmation.owner
                && existing.email_field == confirmation.email_field
                && existing.email == confirmation.email
        }) {
            return Err(InsertError::DuplicateOwner);
        }

        if state
            .confirmations
            .values()
            .any(|existing| existing.token == confirmation.token)
        {
            return Err(InsertError::DuplicateToken);
        }

        state
            .confirmations
            .insert(confirmation.id, confirmation.clone());
        Ok(())
    }

    async fn confirmation_find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailConfirmation>, MemoryError> {
        let state = self.state.lock().await;
        Ok(state
            .confirmations
            .values()
            .find(|confirmation| confirmation.token == token)
            .cloned())
    }

    async fn confirmation_find_for(
        &self,
        owner: &OwnerRef,
        email_field: &str,
    ) -> Result<Option<EmailConfirmation>, MemoryError> {
        let state = self.state.lock().await;
        Ok(state
            .confirmations
            .values()
            .filter(|confirmation| {
                &confirmation.owner == owner && confirmation.email_field == email_field
            })
            .max_by_key(|confirmation| confirmation.created_at)
            .cloned())
    }

    async fn confirmation_send_update(
        &self,
        id: Uuid,
        bookkeeping: SendBookkeeping,
    ) -> Result<(), MemoryError> {
        let mut state = self.state.lock().await;
        let confirmation = state.confirmation_mut(id)?;
        confirmation.sent_at = bookkeeping.sent_at;
        confirmation.resent_at_latest = bookkeeping.resent_at_latest;
        confirmation.send_count = bookkeeping.send_count;
        Ok(())
    }

    async fn transaction_begin(&self) -> Result<MemoryTransaction, MemoryError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTransaction { guard, staged })
    }
}

/// Writes are staged on a copy and swapped in on commit.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl ConfirmTransaction for MemoryTransaction {
    type Error = MemoryError;

    async fn confirmed_at_mark(
        &mut self,
        id: Uuid,
        confirmed_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let confirmation = self.staged.confirmation_mut(id)?;
        if confirmation.confirmed_at.is_some() {
            return Ok(false);
        }
        confirmation.confirmed_at = Some(confirmed_at);
        Ok(true)
    }

    async fn owner_email_set(
        &mut self,
        owner: &OwnerRef,
        email_field: &str,
        email: &str,
    ) -> Result<(), MemoryError> {
        let stored = self
            .staged
            .owners
            .get_mut(owner)
            .ok_or_else(|| MemoryError::OwnerMissing(owner.clone()))?;
        stored
            .fields
            .insert(email_field.to_string(), email.to_string());
        self.staged.owner_writes += 1;
        Ok(())
    }

    async fn commit(self) -> Result<(), MemoryError> {
        let mut guard = self.guard;
        *guard = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), MemoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::token_generate;

    fn confirmation(owner: &OwnerRef, email: &str) -> EmailConfirmation {
        EmailConfirmation::new(owner.clone(), "email", email, token_generate(16))
    }

    #[tokio::test]
    async fn insert_enforces_owner_tuple_uniqueness() {
        let backend = MemoryBackend::new();
        let owner = OwnerRef::new("user", 1);

        backend
            .confirmation_insert(&confirmation(&owner, "a@example.com"))
            .await
            .unwrap();
        let duplicate = backend
            .confirmation_insert(&confirmation(&owner, "a@example.com"))
            .await;

        assert!(matches!(duplicate, Err(InsertError::DuplicateOwner)));
    }

    #[tokio::test]
    async fn insert_enforces_token_uniqueness() {
        let backend = MemoryBackend::new();
        let first = confirmation(&OwnerRef::new("user", 1), "a@example.com");
        let mut second = confirmation(&OwnerRef::new("user", 2), "b@example.com");
        second.token = first.token.clone();

        backend.confirmation_insert(&first).await.unwrap();
        let collision = backend.confirmation_insert(&second).await;

        assert!(matches!(collision, Err(InsertError::DuplicateToken)));
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let backend = MemoryBackend::new();
        let owner = MemoryOwner::new(OwnerRef::new("user", 1)).with_field("email", "old@example.com");
        backend.owner_insert(owner.clone()).await;
        let record = confirmation(&owner.owner_ref(), "new@example.com");
        backend.confirmation_insert(&record).await.unwrap();

        let mut tx = backend.transaction_begin().await.unwrap();
        assert!(tx.confirmed_at_mark(record.id, Utc::now()).await.unwrap());
        tx.owner_email_set(&owner.owner_ref(), "email", "new@example.com")
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let stored = backend
            .confirmation_find_by_token(&record.token)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.confirmed_at.is_none());
        let stored_owner = backend.owner_get(&owner.owner_ref()).await.unwrap().unwrap();
        assert_eq!(stored_owner.field("email"), Some("old@example.com"));
        assert_eq!(backend.owner_writes().await, 0);
    }

    #[tokio::test]
    async fn commit_applies_staged_writes() {
        let backend = MemoryBackend::new();
        let owner = MemoryOwner::new(OwnerRef::new("user", 1)).with_field("email", "old@example.com");
        backend.owner_insert(owner.clone()).await;
        let record = confirmation(&owner.owner_ref(), "new@example.com");
        backend.confirmation_insert(&record).await.unwrap();

        let mut tx = backend.transaction_begin().await.unwrap();
        tx.confirmed_at_mark(record.id, Utc::now()).await.unwrap();
        tx.owner_email_set(&owner.owner_ref(), "email", "new@example.com")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored_owner = backend.owner_get(&owner.owner_ref()).await.unwrap().unwrap();
        assert_eq!(stored_owner.field("email"), Some("new@example.com"));

        let mut tx = backend.transaction_begin().await.unwrap();
        assert!(!tx.confirmed_at_mark(record.id, Utc::now()).await.unwrap());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn removed_owner_resolves_to_none() {
        let backend = MemoryBackend::new();
        let owner = MemoryOwner::new(OwnerRef::new("user", 1));
        backend.owner_insert(owner.clone()).await;

        assert!(backend.owner_remove(&owner.owner_ref()).await.is_some());
        assert!(backend.owner_get(&owner.owner_ref()).await.unwrap().is_none());
    }
}

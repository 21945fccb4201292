//! Create test functions.

use crate::{ConfirmError, EmailOwner, TOKEN_ALPHABET};

use super::{TestContext, confirmation_stored};

/// A fresh confirmation is persisted unsent and unconfirmed.
pub async fn create_persists_unsent_confirmation<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;

    let created = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    let stored = confirmation_stored(&ctx, &created.token).await;
    assert_eq!(stored.id, created.id);
    assert_eq!(stored.owner, owner.owner_ref());
    assert_eq!(stored.email_field, "email");
    assert_eq!(stored.email, "a@example.com");
    assert_eq!(stored.send_count, 0);
    assert!(stored.sent_at.is_none());
    assert!(stored.resent_at_latest.is_none());
    assert!(stored.confirmed_at.is_none());

    assert_eq!(stored.token.len(), ctx.confirm().config().token_length);
    assert!(stored.token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
}

/// Only one confirmation may exist per owner, field and email.
pub async fn create_rejects_duplicate_owner_field_email<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;

    ctx.confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("first create");

    let duplicate = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await;
    assert!(
        matches!(duplicate, Err(ConfirmError::UniquenessViolation)),
        "expected uniqueness violation, got {duplicate:?}"
    );

    ctx.confirm()
        .create(&owner, None, Some("b@example.com"))
        .await
        .expect("a different email for the same owner is allowed");
}

/// Without an explicit email, the owner's field value is used.
pub async fn create_reads_email_from_owner<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;

    let created = ctx
        .confirm()
        .create(&owner, None, None)
        .await
        .expect("create confirmation");

    assert_eq!(created.email, "owner@example.com");
}

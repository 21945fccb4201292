//! Confirm test functions.

use crate::{ConfirmError, ConfirmOutcome, ConfirmRequest, EmailOwner};

use super::{TestContext, confirmation_stored, owner_email_stored};

/// Full flow: create, send, take the token from the mail, confirm it.
pub async fn confirm_applies_email_to_owner<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");
    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let token = ctx.confirm().mailer().last_token().expect("token mailed");
    let (confirmed, outcome) = ctx
        .confirm()
        .confirm_token(&token, &ConfirmRequest::default())
        .await
        .expect("confirm token");

    assert!(matches!(outcome, ConfirmOutcome::Confirmed));
    assert!(confirmed.confirmed_at.is_some());
    assert_eq!(
        owner_email_stored(&ctx, &owner.owner_ref()).await.as_deref(),
        Some("a@example.com")
    );
    let stored = confirmation_stored(&ctx, &token).await;
    assert!(stored.confirmed_at.is_some());
}

/// Confirming a confirmed record changes nothing.
pub async fn confirm_twice_is_noop<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");
    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let request = ConfirmRequest::default();
    let (_, first) = ctx
        .confirm()
        .confirm_token(&confirmation.token, &request)
        .await
        .expect("first confirm");
    let confirmed_at = confirmation_stored(&ctx, &confirmation.token)
        .await
        .confirmed_at;

    let (_, second) = ctx
        .confirm()
        .confirm_token(&confirmation.token, &request)
        .await
        .expect("second confirm");

    assert!(first.is_fresh());
    assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed));
    assert_eq!(
        confirmation_stored(&ctx, &confirmation.token)
            .await
            .confirmed_at,
        confirmed_at
    );
}

/// Expired confirmations fail and mutate neither record nor owner.
pub async fn confirm_expired_leaves_record_unchanged<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");
    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let window = ctx.confirm().config().confirm_expire;
    ctx.confirmation_backdate(&confirmation.token, window).await;
    let before = confirmation_stored(&ctx, &confirmation.token).await;

    let result = ctx
        .confirm()
        .confirm_token(&confirmation.token, &ConfirmRequest::default())
        .await;

    assert!(
        matches!(result, Err(ConfirmError::Expired)),
        "expected expired, got {result:?}"
    );
    assert_eq!(confirmation_stored(&ctx, &confirmation.token).await, before);
    assert_eq!(
        owner_email_stored(&ctx, &owner.owner_ref()).await.as_deref(),
        Some("old@example.com")
    );
}

/// A token that was never mailed cannot be confirmed.
pub async fn confirm_unsent_is_expired<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    let result = ctx
        .confirm()
        .confirm_token(&confirmation.token, &ConfirmRequest::default())
        .await;

    assert!(
        matches!(result, Err(ConfirmError::Expired)),
        "expected expired, got {result:?}"
    );
    assert!(
        confirmation_stored(&ctx, &confirmation.token)
            .await
            .confirmed_at
            .is_none()
    );
}

/// A deleted owner reports the same error as an expired token.
pub async fn confirm_deleted_owner_is_expired<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");
    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    ctx.owner_delete(&owner.owner_ref()).await;
    let result = ctx
        .confirm()
        .confirm_token(&confirmation.token, &ConfirmRequest::default())
        .await;

    assert!(
        matches!(result, Err(ConfirmError::Expired)),
        "expected expired, got {result:?}"
    );
    assert!(
        confirmation_stored(&ctx, &confirmation.token)
            .await
            .confirmed_at
            .is_none()
    );
}

/// Two racing confirms of one pending record apply it exactly once.
pub async fn confirm_concurrent_mutates_owner_once<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("old@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");
    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let request = ConfirmRequest::default();
    let mut first = confirmation.clone();
    let mut second = confirmation.clone();
    let (a, b) = tokio::join!(
        ctx.confirm().confirm(&mut first, &request),
        ctx.confirm().confirm(&mut second, &request)
    );

    let outcomes = [a.expect("first confirm"), b.expect("second confirm")];
    let fresh = outcomes.iter().filter(|o| o.is_fresh()).count();
    assert_eq!(fresh, 1, "exactly one confirm applies the owner update");

    let stored = confirmation_stored(&ctx, &confirmation.token).await;
    assert!(stored.confirmed_at.is_some());
    assert_eq!(
        owner_email_stored(&ctx, &owner.owner_ref()).await.as_deref(),
        Some("a@example.com")
    );
}

/// Unknown tokens are reported as not found.
pub async fn confirm_unknown_token_is_not_found<C: TestContext>() {
    let ctx = C::spawn().await;

    let result = ctx
        .confirm()
        .confirm_token("NOSUCHTOKEN00000", &ConfirmRequest::default())
        .await;

    assert!(
        matches!(result, Err(ConfirmError::NotFound)),
        "expected not found, got {result:?}"
    );
}

//! Send and resend test functions.

use crate::ConfirmError;

use super::{TestContext, confirmation_stored};

/// The first send stamps `sent_at` and counts one send.
pub async fn send_stamps_first_send<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let stored = confirmation_stored(&ctx, &confirmation.token).await;
    assert!(stored.sent_at.is_some());
    assert!(stored.resent_at_latest.is_none());
    assert_eq!(stored.send_count, 1);
    assert_eq!(ctx.confirm().mailer().sent().len(), 1);
}

/// Later sends leave `sent_at` alone and stamp `resent_at_latest`.
pub async fn resend_stamps_latest_resend_only<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    ctx.confirm().send(&mut confirmation).await.expect("first send");
    let first = confirmation_stored(&ctx, &confirmation.token).await;

    ctx.confirm().send(&mut confirmation).await.expect("resend");
    let second = confirmation_stored(&ctx, &confirmation.token).await;

    assert_eq!(second.sent_at, first.sent_at);
    assert!(second.resent_at_latest.is_some());
    assert_eq!(second.send_count, 2);
    assert_eq!(confirmation.send_count, 2, "caller's copy tracks the sends");
}

/// The mailer receives the address, the token and a link embedding the token.
pub async fn send_context_links_to_token<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    ctx.confirm()
        .send(&mut confirmation)
        .await
        .expect("send confirmation");

    let sent = ctx.confirm().mailer().sent();
    let context = sent.last().expect("captured context");
    assert_eq!(context["email"], "a@example.com");
    assert_eq!(context["token"], confirmation.token.as_str());
    assert_eq!(
        context["confirmation_url"],
        ctx.confirm().confirmation_url(&confirmation).as_str()
    );
    assert!(
        context["confirmation_url"]
            .as_str()
            .expect("url string")
            .ends_with(&format!("/key/{}/", confirmation.token))
    );
}

/// Mail failures propagate and no send is recorded.
pub async fn send_mail_failure_leaves_bookkeeping<C: TestContext>() {
    let ctx = C::spawn().await;
    let owner = ctx.owner_create("owner@example.com").await;
    let mut confirmation = ctx
        .confirm()
        .create(&owner, None, Some("a@example.com"))
        .await
        .expect("create confirmation");

    ctx.confirm().mailer().fail_set(true);
    let result = ctx.confirm().send(&mut confirmation).await;
    ctx.confirm().mailer().fail_set(false);

    assert!(
        matches!(result, Err(ConfirmError::Mail(_))),
        "expected mail error, got {result:?}"
    );
    let stored = confirmation_stored(&ctx, &confirmation.token).await;
    assert_eq!(stored.send_count, 0);
    assert!(stored.sent_at.is_none());
    assert_eq!(confirmation.send_count, 0);
}

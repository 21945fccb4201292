//! The confirmation record, its token and its expiry policy.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::OwnerRef;

/// Owner field written on confirmation when none is given.
pub const DEFAULT_EMAIL_FIELD: &str = "email";

/// Characters a token is drawn from.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A pending or completed request to confirm one email address for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfirmation {
    /// Row identifier.
    pub id: Uuid,
    /// The record whose field receives the email once confirmed.
    pub owner: OwnerRef,
    /// Name of the owner field written on confirmation.
    pub email_field: String,
    /// Candidate address.
    pub email: String,
    /// Public lookup key embedded in the confirmation link.
    pub token: String,
    /// First send, if any.
    pub sent_at: Option<DateTime<Utc>>,
    /// Latest send after the first, if any.
    pub resent_at_latest: Option<DateTime<Utc>>,
    /// Set once, when the address is confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Number of completed sends.
    pub send_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Where a confirmation stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    /// Sent, unconfirmed and still inside the confirmation window.
    Pending,
    /// Terminal success.
    Confirmed,
    /// Terminal failure: the window has passed, or the token was never sent.
    Expired,
}

impl EmailConfirmation {
    /// Build a fresh, unsent record.
    pub fn new(
        owner: OwnerRef,
        email_field: impl Into<String>,
        email: impl Into<String>,
        token: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            email_field: email_field.into(),
            email: email.into(),
            token,
            sent_at: None,
            resent_at_latest: None,
            confirmed_at: None,
            send_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Whether the confirmation window has closed at `now`.
    ///
    /// The window opens at the first send, so an unsent record is always
    /// expired: its token was never delivered to anyone. A window reaching
    /// past the representable date range never closes.
    pub fn is_expired_at(&self, window: Duration, now: DateTime<Utc>) -> bool {
        if self.sent_at.is_none() {
            return true;
        }
        match self.expires_at(window) {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }

    /// End of the confirmation window, once the record has been sent.
    ///
    /// `None` when unsent or when the deadline is out of range.
    pub fn expires_at(&self, window: Duration) -> Option<DateTime<Utc>> {
        let sent_at = self.sent_at?;
        let window = chrono::Duration::from_std(window).ok()?;
        sent_at.checked_add_signed(window)
    }

    pub fn state_at(&self, window: Duration, now: DateTime<Utc>) -> ConfirmationState {
        if self.is_confirmed() {
            ConfirmationState::Confirmed
        } else if self.is_expired_at(window, now) {
            ConfirmationState::Expired
        } else {
            ConfirmationState::Pending
        }
    }

    /// Apply send bookkeeping: first send stamps `sent_at`, later sends stamp
    /// `resent_at_latest`.
    pub(crate) fn sent_record(&mut self, now: DateTime<Utc>) {
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        } else {
            self.resent_at_latest = Some(now);
        }
        self.send_count += 1;
    }
}

/// Generate a random confirmation token of `length` characters.
///
/// Each character is drawn independently and uniformly from
/// [`TOKEN_ALPHABET`] using the thread-local CSPRNG.
pub fn token_generate(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn confirmation() -> EmailConfirmation {
        EmailConfirmation::new(
            OwnerRef::new("user", 1),
            DEFAULT_EMAIL_FIELD,
            "a@example.com",
            token_generate(16),
        )
    }

    #[test]
    fn test_token_has_requested_length_and_alphabet() {
        let token = token_generate(16);
        assert_eq!(token.len(), 16);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));

        assert_eq!(token_generate(32).len(), 32);
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(token_generate(16), token_generate(16));
    }

    #[test]
    fn test_new_record_is_unsent() {
        let c = confirmation();
        assert_eq!(c.send_count, 0);
        assert!(c.sent_at.is_none());
        assert!(c.resent_at_latest.is_none());
        assert!(c.confirmed_at.is_none());
    }

    #[test]
    fn test_expiry_boundary() {
        let mut c = confirmation();
        let sent = Utc::now();
        c.sent_at = Some(sent);

        assert!(!c.is_expired_at(DAY, sent + chrono::Duration::seconds(86_399)));
        assert!(c.is_expired_at(DAY, sent + chrono::Duration::seconds(86_400)));
        assert!(c.is_expired_at(DAY, sent + chrono::Duration::seconds(90_000)));
    }

    #[test]
    fn test_out_of_range_window_never_closes() {
        let mut c = confirmation();
        let sent = Utc::now();
        c.sent_at = Some(sent);
        let window = Duration::from_secs(u64::MAX);

        assert_eq!(c.expires_at(window), None);
        assert!(!c.is_expired_at(window, sent + chrono::Duration::days(365)));
        assert_eq!(c.state_at(window, sent), ConfirmationState::Pending);

        c.sent_at = None;
        assert!(c.is_expired_at(window, sent));
    }

    #[test]
    fn test_unsent_record_counts_as_expired() {
        let c = confirmation();
        assert!(c.is_expired_at(DAY, Utc::now()));
        assert_eq!(c.state_at(DAY, Utc::now()), ConfirmationState::Expired);
    }

    #[test]
    fn test_send_bookkeeping() {
        let mut c = confirmation();
        let first = Utc::now();
        c.sent_record(first);
        assert_eq!(c.sent_at, Some(first));
        assert_eq!(c.resent_at_latest, None);
        assert_eq!(c.send_count, 1);

        let second = first + chrono::Duration::seconds(30);
        c.sent_record(second);
        assert_eq!(c.sent_at, Some(first));
        assert_eq!(c.resent_at_latest, Some(second));
        assert_eq!(c.send_count, 2);
    }

    #[test]
    fn test_state_transitions() {
        let mut c = confirmation();
        let now = Utc::now();
        c.sent_at = Some(now);
        assert_eq!(c.state_at(DAY, now), ConfirmationState::Pending);

        c.confirmed_at = Some(now);
        // Confirmed wins over the window closing.
        let later = now + chrono::Duration::days(2);
        assert_eq!(c.state_at(DAY, later), ConfirmationState::Confirmed);
    }
}

//! Email validation and normalization.

use crate::error::ConfirmError;
use email_address::EmailAddress;
use std::str::FromStr;

/// Validate and normalize a candidate address.
///
/// - Trims whitespace
/// - Validates RFC 5322 compliance
/// - Lowercases the domain; the local part is kept as given, since the
///   confirmed value is written back to the owner verbatim
///
/// Returns the normalized email string.
pub fn email_normalize(email: &str) -> Result<String, ConfirmError> {
    let trimmed = email.trim();

    let parsed = EmailAddress::from_str(trimmed).map_err(|_| ConfirmError::InvalidEmail)?;

    Ok(format!(
        "{}@{}",
        parsed.local_part(),
        parsed.domain().to_lowercase()
    ))
}

//! Phone number normalization and WhatsApp JID construction.

use crate::error::WagateError;

/// JID servers accepted verbatim when a recipient is already a full JID.
const KNOWN_SERVERS: [&str; 3] = ["s.whatsapp.net", "g.us", "lid"];

/// Normalize a user-supplied phone number to bare digits.
///
/// Spaces, dashes, dots, parentheses and a leading `+` are dropped. The
/// remainder must be 7 to 15 ASCII digits (E.164 without the plus).
pub fn normalize_phone(raw: &str) -> Result<String, WagateError> {
    let trimmed = raw.trim();
    let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let digits: String = without_plus
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if digits.is_empty() {
        return Err(WagateError::Validation("phone number must not be empty".into()));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(WagateError::Validation(format!(
            "invalid phone number '{raw}': only digits are allowed"
        )));
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(WagateError::Validation(format!(
            "invalid phone number '{raw}': expected 7-15 digits"
        )));
    }

    Ok(digits)
}

/// Turn a recipient (phone number or JID) into a JID string.
pub fn to_jid(raw: &str) -> Result<String, WagateError> {
    let trimmed = raw.trim();
    if let Some((user, server)) = trimmed.split_once('@') {
        if user.is_empty() || !KNOWN_SERVERS.contains(&server) {
            return Err(WagateError::Validation(format!("invalid recipient JID '{raw}'")));
        }
        return Ok(trimmed.to_string());
    }

    Ok(format!("{}@s.whatsapp.net", normalize_phone(trimmed)?))
}

/// Canonical key for a recipient, used for deduplication and logging.
pub fn recipient_key(raw: &str) -> Result<String, WagateError> {
    let jid = to_jid(raw)?;
    Ok(match jid.strip_suffix("@s.whatsapp.net") {
        Some(user) => user.to_string(),
        None => jid,
    })
}

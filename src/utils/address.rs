//! Utility functions for pulling addresses out of raw input fields.

use once_cell::sync::Lazy;
use regex::Regex;

static ANGLE_BRACKET_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([^<>@\s]+@[^<>@\s]+)>").expect("angle bracket email pattern is valid")
});

static PAREN_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^@\s]+@[^@\s]+)\s*\(.*\)$").expect("parenthesised email pattern is valid")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

fn strip_quotes(value: &str) -> &str {
    let quoted = (value.starts_with('"') && value.ends_with('"'))
        || (value.starts_with('\'') && value.ends_with('\''));
    if quoted && value.len() >= 2 {
        value[1..value.len() - 1].trim()
    } else {
        value
    }
}

/// Extracts an address from display formats such as `Name <a@b.com>`,
/// `a@b.com (Name)`, `"a@b.com"` or a plain address.
///
/// Returns the trimmed input unchanged when no known format matches.
pub fn extract_email_from_field(value: &str) -> String {
    let value = strip_quotes(value.trim());
    if value.is_empty() {
        return String::new();
    }

    if let Some(caps) = ANGLE_BRACKET_EMAIL_RE.captures(value) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = PAREN_EMAIL_RE.captures(value) {
        return caps[1].trim().to_string();
    }
    value.to_string()
}

/// Normalizes an address for verification: trims, drops surrounding quotes or
/// angle brackets and trailing punctuation, and lower-cases the domain while
/// keeping the local part as given.
///
/// Returns `None` for input that has no `local@domain` shape at all.
pub fn normalize_email(email: &str) -> Option<String> {
    let mut email = strip_quotes(email.trim());
    if email.starts_with('<') && email.ends_with('>') && email.len() >= 2 {
        email = email[1..email.len() - 1].trim();
    }
    let email = email.trim_end_matches(TRAILING_PUNCTUATION);

    let (local, domain) = email.rsplit_once('@')?;
    let local = local.trim();
    let domain = domain.trim().to_lowercase();
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(format!("{}@{}", local, domain))
}

/// Runs extraction then normalization on a raw field. `None` means the field
/// holds nothing address-shaped and is treated as empty.
pub fn clean_address_field(raw: &str) -> Option<String> {
    let extracted = extract_email_from_field(raw);
    if extracted.is_empty() {
        return None;
    }
    normalize_email(&extracted)
}

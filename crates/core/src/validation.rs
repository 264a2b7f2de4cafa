//! Input validation shared by the admin and portal APIs.

use crate::error::{SaasError, SaasResult};

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 50;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Subdomains that collide with platform hostnames.
pub const RESERVED_SUBDOMAINS: &[&str] = &[
    "www", "api", "admin", "support", "help", "docs", "mail", "ftp", "smtp", "pop", "imap", "ns1",
    "ns2", "mx", "test", "staging", "dev", "demo", "portal", "app", "dashboard", "billing",
    "payment", "webhook", "status", "health",
];

const WEAK_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "password123",
    "admin",
    "qwerty",
    "letmein",
    "welcome",
    "monkey",
    "1234567890",
    "password1",
];

/// Validate a tenant slug. The slug doubles as the tenant subdomain.
pub fn validate_slug(slug: &str) -> SaasResult<()> {
    if slug.len() < SLUG_MIN_LEN {
        return Err(SaasError::validation(format!(
            "Slug must be at least {SLUG_MIN_LEN} characters long"
        )));
    }
    if slug.len() > SLUG_MAX_LEN {
        return Err(SaasError::validation(format!(
            "Slug must be at most {SLUG_MAX_LEN} characters long"
        )));
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(SaasError::validation(
            "Slug must contain only lowercase letters, numbers, and hyphens",
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(SaasError::validation(
            "Slug cannot start or end with a hyphen",
        ));
    }
    if RESERVED_SUBDOMAINS.contains(&slug) {
        return Err(SaasError::validation(format!(
            "'{slug}' is a reserved subdomain"
        )));
    }
    Ok(())
}

/// Validate and normalize an email address to lowercase.
pub fn normalize_email(email: &str) -> SaasResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || email.len() > EMAIL_MAX_LEN {
        return Err(SaasError::validation("Invalid email format"));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(SaasError::validation("Invalid email format"));
    };

    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));

    let domain_ok = match domain.rsplit_once('.') {
        Some((host, tld)) => {
            !host.is_empty()
                && !host.starts_with('.')
                && !host.contains("..")
                && host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                && tld.len() >= 2
                && tld.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    };

    if local_ok && domain_ok {
        Ok(email)
    } else {
        Err(SaasError::validation("Invalid email format"))
    }
}

/// Collect every password rule the candidate fails. Empty means acceptable.
pub fn password_problems(password: &str) -> Vec<String> {
    let mut problems = Vec::new();
    let len = password.chars().count();

    if len < PASSWORD_MIN_LEN {
        problems.push(format!(
            "Password must be at least {PASSWORD_MIN_LEN} characters long"
        ));
    }
    if len > PASSWORD_MAX_LEN {
        problems.push(format!(
            "Password must be at most {PASSWORD_MAX_LEN} characters long"
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        problems.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        problems.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        problems.push("Password must contain at least one number".to_string());
    }
    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        problems.push("Password must contain at least one special character".to_string());
    }
    if WEAK_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        problems.push("Password is too common".to_string());
    }

    problems
}

pub fn validate_password(password: &str) -> SaasResult<()> {
    let problems = password_problems(password);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(SaasError::WeakPassword(problems))
    }
}

/// Accepts an optional leading `+` and 7-15 digits, ignoring spaces,
/// dashes, and parentheses.
pub fn validate_phone(phone: &str) -> SaasResult<()> {
    let cleaned: String = phone
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if (7..=15).contains(&cleaned.len()) && cleaned.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(SaasError::validation("Invalid phone number"))
    }
}

/// Hostname check for customer-supplied custom domains.
pub fn validate_domain(domain: &str) -> SaasResult<()> {
    let invalid = || SaasError::validation(format!("Invalid domain '{domain}'"));

    if domain.is_empty() || domain.len() > 253 {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid());
    }
    for label in &labels {
        let ok = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !ok {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Check a free-text field's trimmed length.
pub fn validate_length(field: &str, value: &str, min: usize, max: usize) -> SaasResult<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(SaasError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

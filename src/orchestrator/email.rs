//! Email address validation against the allowed domain.

use thiserror::Error;

/// Reasons an email address is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("'{0}' is not an email address")]
    NotAnEmail(String),

    #[error("The part before '@' is empty")]
    EmptyLocalPart,

    #[error("Email must end with @{allowed}")]
    WrongDomain { allowed: String },
}

/// Checks that `email` belongs to `allowed_domain` and returns it trimmed.
///
/// The domain comparison is case-insensitive; the split happens at the
/// last `@`.
pub fn validate_email(email: &str, allowed_domain: &str) -> Result<String, EmailError> {
    let email = email.trim();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return Err(EmailError::NotAnEmail(email.to_owned()));
    };

    if local.is_empty() {
        return Err(EmailError::EmptyLocalPart);
    }
    if !domain.eq_ignore_ascii_case(allowed_domain) {
        return Err(EmailError::WrongDomain {
            allowed: allowed_domain.to_owned(),
        });
    }

    Ok(email.to_owned())
}

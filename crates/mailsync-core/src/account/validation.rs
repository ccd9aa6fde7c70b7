//! Account validation.

use super::model::Account;

/// Validation error for account configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Account name is empty.
    EmptyName,
    /// Email address is empty.
    EmptyEmail,
    /// Email address format is invalid.
    InvalidEmail,
    /// IMAP host is empty.
    EmptyHost,
    /// IMAP host contains whitespace or a scheme.
    InvalidHost,
    /// IMAP port is zero.
    InvalidPort,
    /// IMAP username is empty.
    EmptyUsername,
    /// IMAP password is empty.
    EmptyPassword,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyName => "Account name is required",
            Self::EmptyEmail => "Email address is required",
            Self::InvalidEmail => "Invalid email address format",
            Self::EmptyHost => "IMAP server is required",
            Self::InvalidHost => "IMAP server must be a bare hostname",
            Self::InvalidPort => "IMAP port must be 1-65535",
            Self::EmptyUsername => "IMAP username is required",
            Self::EmptyPassword => "IMAP password is required",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyName => "name",
            Self::EmptyEmail | Self::InvalidEmail => "email",
            Self::EmptyHost | Self::InvalidHost => "host",
            Self::InvalidPort => "port",
            Self::EmptyUsername => "username",
            Self::EmptyPassword => "password",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating an account.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate an account before it is added to the directory.
///
/// # Errors
///
/// Returns every `ValidationError` found, not just the first.
pub fn validate_account(account: &Account) -> ValidationResult {
    let mut errors = Vec::new();

    if account.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    if account.email.trim().is_empty() {
        errors.push(ValidationError::EmptyEmail);
    } else if !is_valid_email(&account.email) {
        errors.push(ValidationError::InvalidEmail);
    }

    let host = account.imap.host.trim();
    if host.is_empty() {
        errors.push(ValidationError::EmptyHost);
    } else if host.contains(char::is_whitespace) || host.contains("://") {
        errors.push(ValidationError::InvalidHost);
    }
    if account.imap.port == 0 {
        errors.push(ValidationError::InvalidPort);
    }
    if account.imap.username.trim().is_empty() {
        errors.push(ValidationError::EmptyUsername);
    }
    if account.imap.password.is_empty() {
        errors.push(ValidationError::EmptyPassword);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn valid_account() -> Account {
        let mut account = Account::with_email("user@example.com");
        account.name = "Work".to_string();
        account.imap.password = "secret".to_string();
        account
    }

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user.name@example.com"));
        assert!(is_valid_email("user@sub.example.com"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@@example.com"));
        assert!(!is_valid_email("user@example..com"));
    }

    #[test]
    fn test_validate_valid_account() {
        assert!(validate_account(&valid_account()).is_ok());
    }

    #[test]
    fn test_validate_empty_account() {
        let errors = validate_account(&Account::new()).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyName));
        assert!(errors.contains(&ValidationError::EmptyEmail));
        assert!(errors.contains(&ValidationError::EmptyHost));
        assert!(errors.contains(&ValidationError::InvalidPort));
        assert!(errors.contains(&ValidationError::EmptyUsername));
        assert!(errors.contains(&ValidationError::EmptyPassword));
    }

    #[test]
    fn test_validate_host_with_scheme() {
        let mut account = valid_account();
        account.imap.host = "imaps://mail.example.com".to_string();
        let errors = validate_account(&account).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidHost]);
        assert_eq!(errors[0].field(), "host");
    }
}
